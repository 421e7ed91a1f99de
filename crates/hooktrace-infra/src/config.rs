//! Hook configuration loader.
//!
//! Settings come from environment variables. A `.env` file in the OpenCode
//! config directory (`~/.config/opencode/.env`) supplies values for keys the
//! process environment does not set. Invalid values fall back to defaults;
//! the loader returns a warning for each so the caller can log them once the
//! subscriber (whose log file depends on this config) is up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use hooktrace_types::config::{
    DEFAULT_BASE_URL, DEFAULT_HTTP_TIMEOUT, DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_CHARS,
    DEFAULT_USER_ID, HookConfig, LogLevel, ReconstructionSettings,
};
use hooktrace_types::error::ConfigError;

pub const ENV_GATE: &str = "TRACE_TO_LANGFUSE";
pub const ENV_PUBLIC_KEY: &str = "LANGFUSE_PUBLIC_KEY";
pub const ENV_SECRET_KEY: &str = "LANGFUSE_SECRET_KEY";
pub const ENV_BASE_URL: &str = "LANGFUSE_BASE_URL";
pub const ENV_HOST: &str = "LANGFUSE_HOST";
pub const ENV_USER_ID: &str = "LANGFUSE_USER_ID";
pub const ENV_LOG_LEVEL: &str = "OPENCODE_LANGFUSE_LOG_LEVEL";
pub const ENV_DEBUG: &str = "OPENCODE_LANGFUSE_DEBUG";
pub const ENV_MAX_MESSAGE_EVENTS: &str = "OPENCODE_LANGFUSE_MAX_MESSAGE_EVENTS_PER_MESSAGE";
pub const ENV_MAX_CHARS: &str = "OPENCODE_LANGFUSE_MAX_CHARS";
pub const ENV_STATE_DIR: &str = "OPENCODE_LANGFUSE_STATE_DIR";
pub const ENV_LOCK_TIMEOUT_MS: &str = "OPENCODE_LANGFUSE_LOCK_TIMEOUT_MS";
pub const ENV_HTTP_TIMEOUT_MS: &str = "OPENCODE_LANGFUSE_HTTP_TIMEOUT_MS";
pub const ENV_OTEL_STDOUT: &str = "OPENCODE_LANGFUSE_OTEL_STDOUT";

const UNKNOWN_HOST: &str = "unknown-host";

/// OpenCode's config directory: `~/.config/opencode`.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("opencode")
}

/// Default state directory: `~/.config/opencode/state/langfuse`.
pub fn default_state_dir() -> PathBuf {
    config_dir().join("state").join("langfuse")
}

/// Machine identifier recorded on new sessions.
pub fn host_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

/// Parse `.env` content.
///
/// Blank lines, `#` comments and lines without `=` are skipped. The key is
/// everything before the first `=`; surrounding quotes are stripped from the
/// value. Later duplicates win.
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        vars.insert(key.to_string(), value.to_string());
    }
    vars
}

/// Read and parse a `.env` file. A missing file is an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(parse_env_file(&content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(err) => Err(ConfigError::EnvFile {
            path: path.display().to_string(),
            reason: err.to_string(),
        }),
    }
}

/// Key lookup with the process environment layered over `.env` values.
#[derive(Debug, Default, Clone)]
pub struct EnvSource {
    file: HashMap<String, String>,
}

impl EnvSource {
    pub fn new(file: HashMap<String, String>) -> Self {
        Self { file }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .or_else(|| self.file.get(key).cloned())
    }
}

/// Load configuration from the process environment and
/// `~/.config/opencode/.env`.
pub fn load_hook_config() -> (HookConfig, Vec<String>) {
    let env_path = config_dir().join(".env");
    let mut warnings = Vec::new();
    let file = match read_env_file(&env_path) {
        Ok(vars) => vars,
        Err(err) => {
            warnings.push(format!("{err}, ignoring it"));
            HashMap::new()
        }
    };
    let source = EnvSource::new(file);
    let (config, more) = hook_config_from(|key| source.get(key));
    warnings.extend(more);
    (config, warnings)
}

/// Build a [`HookConfig`] from an arbitrary key lookup.
///
/// Empty values count as unset. Returns the config and a warning for every
/// value that was present but unusable.
pub fn hook_config_from(lookup: impl Fn(&str) -> Option<String>) -> (HookConfig, Vec<String>) {
    let get = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let mut warnings = Vec::new();

    let enabled = get(ENV_GATE).is_some_and(|value| value.eq_ignore_ascii_case("true"));
    let public_key = get(ENV_PUBLIC_KEY).map(SecretString::from);
    let secret_key = get(ENV_SECRET_KEY).map(SecretString::from);
    let base_url = get(ENV_BASE_URL)
        .or_else(|| get(ENV_HOST))
        .map(|url| url.trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let log_level = if get(ENV_DEBUG).is_some_and(|value| is_truthy(&value)) {
        LogLevel::Debug
    } else {
        match get(ENV_LOG_LEVEL) {
            None => LogLevel::default(),
            Some(raw) => LogLevel::parse(&raw).unwrap_or_else(|| {
                warnings.push(format!("Invalid {ENV_LOG_LEVEL} '{raw}', using INFO"));
                LogLevel::default()
            }),
        }
    };

    let defaults = ReconstructionSettings::default();
    let max_message_events = parse_positive(
        get(ENV_MAX_MESSAGE_EVENTS),
        ENV_MAX_MESSAGE_EVENTS,
        defaults.max_message_events as u64,
        &mut warnings,
    ) as usize;
    let max_chars = parse_positive(
        get(ENV_MAX_CHARS),
        ENV_MAX_CHARS,
        DEFAULT_MAX_CHARS as u64,
        &mut warnings,
    ) as usize;
    let lock_timeout = Duration::from_millis(parse_positive(
        get(ENV_LOCK_TIMEOUT_MS),
        ENV_LOCK_TIMEOUT_MS,
        DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
        &mut warnings,
    ));
    let http_timeout = Duration::from_millis(parse_positive(
        get(ENV_HTTP_TIMEOUT_MS),
        ENV_HTTP_TIMEOUT_MS,
        DEFAULT_HTTP_TIMEOUT.as_millis() as u64,
        &mut warnings,
    ));

    let state_dir = get(ENV_STATE_DIR)
        .map(|dir| expand_home(&dir))
        .unwrap_or_else(default_state_dir);

    let config = HookConfig {
        enabled,
        public_key,
        secret_key,
        base_url,
        log_level,
        state_dir,
        lock_timeout,
        http_timeout,
        otel_stdout: get(ENV_OTEL_STDOUT).is_some_and(|value| is_truthy(&value)),
        reconstruction: ReconstructionSettings {
            max_message_events,
            max_chars,
            default_user_id: get(ENV_USER_ID).unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            host_id: host_id(),
            integration_name: defaults.integration_name,
        },
    };
    (config, warnings)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_positive(raw: Option<String>, key: &str, default: u64, warnings: &mut Vec<String>) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => value,
        _ => {
            warnings.push(format!("Invalid {key} '{raw}', using default {default}"));
            default
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
