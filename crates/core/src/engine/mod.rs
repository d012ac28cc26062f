//! Remote compute seam.
//!
//! The calc engine is an opaque remote procedure: one request in, one result
//! document or one failure out. [`CalcEngine`] is the trait the orchestrator
//! depends on; [`http::HttpCalcEngine`] talks to the real service.

#[cfg(feature = "http")]
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body sent to the engine's run endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    pub calc_run_id: String,
    pub branch_type: String,
    pub formula_version: String,
    pub inputs: Map<String, Value>,
}

/// Errors that can occur when invoking the calc engine.
///
/// Both variants are handled identically by the orchestrator; they stay
/// separate so logs can tell a misbehaving engine from an absent one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine answered with a non-success HTTP status.
    #[error("Calc engine error {status_code}: {body}")]
    Remote { status_code: u16, body: String },

    /// The engine was unreachable, the exchange timed out, or the response
    /// could not be read.
    #[error("Calc engine unavailable: {message}")]
    Unavailable { message: String },
}

/// A single synchronous request/response exchange with the calc engine.
///
/// Implementations must not retry: a failed exchange gives no guarantee the
/// engine did not execute, and the caller treats it as final.
#[async_trait]
pub trait CalcEngine: Send + Sync + 'static {
    /// Run the calculation and return the engine's result document.
    async fn invoke(&self, request: &EngineRequest) -> Result<Value, EngineError>;

    /// Short identifier used in logs.
    fn engine_id(&self) -> &str;
}
