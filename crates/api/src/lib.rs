//! bersn-api: HTTP boundary for calc-run orchestration.
//!
//! The binary wires configuration, logging and the storage backend together;
//! the router is exposed here so it can be served in-process by tests.

pub mod config;
pub mod serve;

pub use serve::{router, serve_listener, start_server, AppState, MAX_BODY_SIZE};
