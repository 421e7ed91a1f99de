//! LangfuseEmitter -- concrete [`TraceEmitter`] for the Langfuse ingestion API.
//!
//! Each trace becomes one batch POSTed to `/api/public/ingestion` with HTTP
//! basic auth (public key as user, secret key as password). The keys are
//! held as [`SecretString`] and only exposed while building the request.

use std::time::Duration;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

use hooktrace_core::trace::TraceEmitter;
use hooktrace_types::config::HookConfig;
use hooktrace_types::error::EmitError;
use hooktrace_types::trace::TraceRecord;

use super::types::{IngestionResponse, batch_for};

const INGESTION_PATH: &str = "/api/public/ingestion";

/// Longest slice of a response body kept in errors and logs.
const MAX_ERROR_BODY: usize = 500;

pub struct LangfuseEmitter {
    client: reqwest::Client,
    public_key: SecretString,
    secret_key: SecretString,
    base_url: String,
}

impl LangfuseEmitter {
    /// Create an emitter with a per-request timeout.
    pub fn new(
        public_key: SecretString,
        secret_key: SecretString,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EmitError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmitError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            public_key,
            secret_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build an emitter from the hook configuration.
    pub fn from_config(config: &HookConfig) -> Result<Self, EmitError> {
        match (&config.public_key, &config.secret_key) {
            (Some(public_key), Some(secret_key)) => Self::new(
                public_key.clone(),
                secret_key.clone(),
                config.base_url.clone(),
                config.http_timeout,
            ),
            _ => Err(EmitError::NotConfigured),
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, INGESTION_PATH)
    }
}

fn clip(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    body.chars().take(MAX_ERROR_BODY).collect::<String>() + "..."
}

impl TraceEmitter for LangfuseEmitter {
    async fn emit(&self, trace: &TraceRecord) -> Result<(), EmitError> {
        let batch = batch_for(trace, Utc::now(), || uuid::Uuid::now_v7().to_string())
            .map_err(|e| EmitError::Encode(e.to_string()))?;
        let total = batch.batch.len();

        let response = self
            .client
            .post(self.url())
            .basic_auth(
                self.public_key.expose_secret(),
                Some(self.secret_key.expose_secret()),
            )
            .json(&batch)
            .send()
            .await
            .map_err(|e| EmitError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(EmitError::Status {
                status: status.as_u16(),
                body: clip(&body),
            });
        }

        // 200 and 207 share the successes/errors shape; an empty or
        // non-JSON body on a 2xx counts as accepted.
        let parsed: IngestionResponse = serde_json::from_str(&body).unwrap_or_default();
        if !parsed.errors.is_empty() {
            let detail = parsed
                .errors
                .iter()
                .map(|e| format!("{} ({}): {}", e.id, e.status, e.message.as_deref().unwrap_or("")))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EmitError::Rejected {
                rejected: parsed.errors.len(),
                total,
                detail: clip(&detail),
            });
        }

        tracing::debug!(
            trace_id = %trace.trace_id,
            events = total,
            status = status.as_u16(),
            "trace accepted by Langfuse"
        );
        Ok(())
    }
}
