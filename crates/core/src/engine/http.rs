//! HTTP calc engine -- `POST {base_url}/calc/bersn/run`.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` to avoid
//! blocking the async runtime. Non-success statuses come back as values
//! (`http_status_as_error(false)`) so the body can be reported; only
//! transport failures and the global timeout surface as ureq errors.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{CalcEngine, EngineError, EngineRequest};

/// Path of the run endpoint, relative to the engine base URL.
pub const RUN_PATH: &str = "/calc/bersn/run";

/// Default bound on one engine exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Calc engine reached over HTTP/JSON.
#[derive(Clone)]
pub struct HttpCalcEngine {
    run_url: String,
    agent: ureq::Agent,
}

impl HttpCalcEngine {
    /// Create an engine client for `base_url` with a global per-call timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        HttpCalcEngine {
            run_url: format!("{}{}", base_url.trim_end_matches('/'), RUN_PATH),
            agent,
        }
    }

    pub fn run_url(&self) -> &str {
        &self.run_url
    }
}

#[async_trait]
impl CalcEngine for HttpCalcEngine {
    async fn invoke(&self, request: &EngineRequest) -> Result<Value, EngineError> {
        let agent = self.agent.clone();
        let url = self.run_url.clone();
        let body = request.clone();

        tokio::task::spawn_blocking(move || {
            let response =
                agent
                    .post(&url)
                    .send_json(&body)
                    .map_err(|e| EngineError::Unavailable {
                        message: e.to_string(),
                    })?;

            let status = response.status();
            let mut payload = response.into_body();

            if !status.is_success() {
                let text = payload.read_to_string().unwrap_or_default();
                return Err(EngineError::Remote {
                    status_code: status.as_u16(),
                    body: text,
                });
            }

            payload
                .read_json::<Value>()
                .map_err(|e| EngineError::Remote {
                    status_code: status.as_u16(),
                    body: format!("invalid JSON result: {}", e),
                })
        })
        .await
        .map_err(|e| EngineError::Unavailable {
            message: format!("task join error: {}", e),
        })?
    }

    fn engine_id(&self) -> &str {
        "http"
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
