//! Configuration types for hooktrace.
//!
//! `HookConfig` is assembled by `hooktrace-infra::config` from environment
//! variables (and an optional `.env` file). All fields have defaults except
//! the two backend credentials.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use std::path::PathBuf;
use std::time::Duration;

use crate::session::DEFAULT_MAX_MESSAGE_EVENTS;

/// Default Langfuse endpoint.
pub const DEFAULT_BASE_URL: &str = "https://cloud.langfuse.com";

/// Default user id when the host does not provide one.
pub const DEFAULT_USER_ID: &str = "opencode-user";

/// Default text truncation limit for trace payloads.
pub const DEFAULT_MAX_CHARS: usize = 20_000;

/// Default name of the integration, used as the first trace tag.
pub const DEFAULT_INTEGRATION_NAME: &str = "opencode";

/// Default bounded wait for the per-session lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Default request timeout for the backend.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Diagnostic log level. Has no behavioural effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse the level names accepted in configuration (`WARNING` is an
    /// alias of `WARN`). Unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Directive string for `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Settings consumed by the reconstruction core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructionSettings {
    /// Cap on raw message events kept per role per turn.
    pub max_message_events: usize,
    /// Truncation limit for text placed in traces.
    pub max_chars: usize,
    /// User id for sessions whose events carry none.
    pub default_user_id: String,
    /// Machine identifier recorded on new sessions.
    pub host_id: String,
    /// First tag on every trace.
    pub integration_name: String,
}

impl Default for ReconstructionSettings {
    fn default() -> Self {
        Self {
            max_message_events: DEFAULT_MAX_MESSAGE_EVENTS,
            max_chars: DEFAULT_MAX_CHARS,
            default_user_id: DEFAULT_USER_ID.to_string(),
            host_id: "unknown-host".to_string(),
            integration_name: DEFAULT_INTEGRATION_NAME.to_string(),
        }
    }
}

/// Full runtime configuration of one hook invocation.
///
/// Credentials are wrapped in [`SecretString`] and never appear in `Debug`
/// output or logs.
#[derive(Debug)]
pub struct HookConfig {
    /// Master gate. When false the hook does nothing at all.
    pub enabled: bool,
    pub public_key: Option<SecretString>,
    pub secret_key: Option<SecretString>,
    pub base_url: String,
    pub log_level: LogLevel,
    pub state_dir: PathBuf,
    pub lock_timeout: Duration,
    pub http_timeout: Duration,
    /// Bridge diagnostic spans to stdout through OpenTelemetry.
    pub otel_stdout: bool,
    pub reconstruction: ReconstructionSettings,
}

impl HookConfig {
    /// Whether both backend credentials are present.
    pub fn has_credentials(&self) -> bool {
        self.public_key.is_some() && self.secret_key.is_some()
    }

    /// Whether the hook should run: gate on and credentials present.
    pub fn is_active(&self) -> bool {
        self.enabled && self.has_credentials()
    }

    /// Directory holding per-session envelopes and lock files.
    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    /// Diagnostic log file.
    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join("hooktrace.log")
    }
}
