//! Application state.

use bersn_core::{CalcEngine, Orchestrator};
use bersn_storage::CalcStorage;

/// Application state shared across request handlers.
pub struct AppState<S: CalcStorage, E: CalcEngine> {
    /// Owns the injected store and engine handles.
    pub orchestrator: Orchestrator<S, E>,
}

impl<S: CalcStorage, E: CalcEngine> AppState<S, E> {
    pub fn new(orchestrator: Orchestrator<S, E>) -> Self {
        AppState { orchestrator }
    }
}
