use crate::record::RunStatus;

/// All errors that can be returned by a CalcStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An input version with this id is already stored. Input versions are
    /// write-once, so this always points at an id-generation defect.
    #[error("input version already exists: {id}")]
    InputVersionExists { id: String },

    /// A calc run with this id is already recorded.
    #[error("calc run already exists: {id}")]
    RunExists { id: String },

    /// A result has already been stored for this calc run.
    #[error("calc result already exists for run {calc_run_id}")]
    ResultExists { calc_run_id: String },

    /// No input version with the given id.
    #[error("input version not found: {id}")]
    InputVersionNotFound { id: String },

    /// No calc run with the given id.
    #[error("calc run not found: {id}")]
    RunNotFound { id: String },

    /// No result stored for the given calc run.
    #[error("calc result not found for run {calc_run_id}")]
    ResultNotFound { calc_run_id: String },

    /// The requested status change is not RUNNING -> terminal.
    #[error("invalid status transition for run {calc_run_id}: {from} -> {to}")]
    InvalidTransition {
        calc_run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// True for uniqueness and state-machine violations.
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            StorageError::InputVersionExists { .. }
                | StorageError::RunExists { .. }
                | StorageError::ResultExists { .. }
                | StorageError::InvalidTransition { .. }
        )
    }

    /// True when the addressed record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::InputVersionNotFound { .. }
                | StorageError::RunNotFound { .. }
                | StorageError::ResultNotFound { .. }
        )
    }
}
