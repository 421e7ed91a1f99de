//! Application state wiring the pipeline to its concrete adapters.
//!
//! `IngestService` is generic over its store and emitter; AppState pins it
//! to the file store and either the Langfuse emitter (ingest, flush) or an
//! emitter that refuses to send (inspect, prune).

use std::path::PathBuf;

use hooktrace_core::IngestService;
use hooktrace_core::trace::UnconfiguredEmitter;
use hooktrace_infra::config::load_hook_config;
use hooktrace_infra::langfuse::LangfuseEmitter;
use hooktrace_infra::state::FileSessionStore;
use hooktrace_types::config::HookConfig;
use hooktrace_types::error::EmitError;

pub type LiveService = IngestService<FileSessionStore, LangfuseEmitter>;
pub type OfflineService = IngestService<FileSessionStore, UnconfiguredEmitter>;

pub struct AppState {
    pub config: HookConfig,
    /// Config problems found before logging was set up.
    pub warnings: Vec<String>,
}

impl AppState {
    /// Load configuration, applying a `--state-dir` override.
    pub fn load(state_dir: Option<PathBuf>) -> Self {
        let (mut config, warnings) = load_hook_config();
        if let Some(dir) = state_dir {
            config.state_dir = dir;
        }
        Self { config, warnings }
    }

    pub fn store(&self) -> FileSessionStore {
        FileSessionStore::new(self.config.sessions_dir(), self.config.lock_timeout)
    }

    /// Pipeline that sends to Langfuse. Gated by `TRACE_TO_LANGFUSE`.
    pub fn live_service(&self) -> Result<LiveService, EmitError> {
        let emitter = LangfuseEmitter::from_config(&self.config)?;
        Ok(IngestService::new(
            self.store(),
            emitter,
            self.config.reconstruction.clone(),
        )
        .with_gate(self.config.is_active()))
    }

    /// Pipeline for commands that only read or delete state.
    pub fn offline_service(&self) -> OfflineService {
        IngestService::new(
            self.store(),
            UnconfiguredEmitter,
            self.config.reconstruction.clone(),
        )
    }
}
