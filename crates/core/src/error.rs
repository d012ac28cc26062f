//! Error taxonomy for calc-run orchestration.

use bersn_storage::StorageError;
use serde::Serialize;

use crate::engine::EngineError;

/// Stable tag for each error class. Logged as `error_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Constraint,
    NotFound,
    Remote,
    Unavailable,
    Persistence,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Constraint => "constraint",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Remote => "remote",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Persistence => "persistence",
        }
    }
}

/// Errors surfaced by the orchestrator.
///
/// The `Display` form is the human-readable message: it is what the caller
/// receives and what a compensating FAILED write stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    /// Client input malformed or missing. Never retried.
    #[error("{message}")]
    Validation { message: String },

    /// A store uniqueness or state-machine contract was violated.
    #[error("{message}")]
    Constraint { message: String },

    /// A record the orchestrator relies on does not exist.
    #[error("{message}")]
    NotFound { message: String },

    /// The calc engine answered with a non-success status.
    #[error("Calc engine error {status_code}: {body}")]
    Remote { status_code: u16, body: String },

    /// The calc engine was unreachable or timed out.
    #[error("Calc engine unavailable: {message}")]
    Unavailable { message: String },

    /// The store failed during the primary transaction.
    #[error("{message}")]
    Persistence { message: String },
}

impl CalcError {
    pub fn validation(message: impl Into<String>) -> Self {
        CalcError::Validation {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CalcError::Validation { .. } => ErrorKind::Validation,
            CalcError::Constraint { .. } => ErrorKind::Constraint,
            CalcError::NotFound { .. } => ErrorKind::NotFound,
            CalcError::Remote { .. } => ErrorKind::Remote,
            CalcError::Unavailable { .. } => ErrorKind::Unavailable,
            CalcError::Persistence { .. } => ErrorKind::Persistence,
        }
    }

    /// Client-class failures (HTTP 400). Everything else is server-class.
    pub fn is_client_error(&self) -> bool {
        matches!(self, CalcError::Validation { .. })
    }
}

impl From<StorageError> for CalcError {
    fn from(e: StorageError) -> Self {
        let message = e.to_string();
        if e.is_constraint() {
            CalcError::Constraint { message }
        } else if e.is_not_found() {
            CalcError::NotFound { message }
        } else {
            CalcError::Persistence { message }
        }
    }
}

impl From<EngineError> for CalcError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Remote { status_code, body } => CalcError::Remote { status_code, body },
            EngineError::Unavailable { message } => CalcError::Unavailable { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_message_carries_status_and_body() {
        let err = CalcError::from(EngineError::Remote {
            status_code: 503,
            body: "Service Unavailable".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert_eq!(err.to_string(), "Calc engine error 503: Service Unavailable");
        assert!(!err.is_client_error());
    }

    #[test]
    fn storage_errors_map_to_kinds() {
        let exists = CalcError::from(StorageError::RunExists {
            id: "r".to_string(),
        });
        assert_eq!(exists.kind(), ErrorKind::Constraint);

        let missing = CalcError::from(StorageError::RunNotFound {
            id: "r".to_string(),
        });
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let down = CalcError::from(StorageError::Backend("connection refused".to_string()));
        assert_eq!(down.kind(), ErrorKind::Persistence);
        assert!(down.to_string().contains("connection refused"));
    }

    #[test]
    fn only_validation_is_client_class() {
        assert!(CalcError::validation("missing").is_client_error());
        assert!(!CalcError::Unavailable {
            message: "timeout".to_string()
        }
        .is_client_error());
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(ErrorKind::NotFound).unwrap(),
            serde_json::json!("not_found")
        );
    }
}
