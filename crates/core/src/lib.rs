//! bersn-core: calc-run orchestration.
//!
//! Takes a submission of versioned inputs, snapshots them durably, hands the
//! computation to an external calc engine and records the outcome.
//!
//! # Public API
//!
//! - [`Orchestrator`] -- drives a run from submission to a terminal state
//! - [`fingerprint()`] -- content hash over `{branch_type, formula_version, inputs}`
//! - [`CalcEngine`] -- the remote compute seam, with [`HttpCalcEngine`] for production
//! - [`CalcError`] -- error taxonomy surfaced to callers

pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod submission;

pub use engine::{CalcEngine, EngineError, EngineRequest};
#[cfg(feature = "http")]
pub use engine::http::HttpCalcEngine;
pub use error::{CalcError, ErrorKind};
pub use fingerprint::{canonical_payload, fingerprint};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunOutcome, RunView};
pub use submission::{RunDraft, RunSubmission, MISSING_FIELDS_MESSAGE};
