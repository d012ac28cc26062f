use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Lifecycle status of a calc run.
///
/// `Running` is the only non-terminal state. A run moves exactly once to
/// `Succeeded` or `Failed` and never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Whether `self -> next` is a legal ledger transition.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Running, RunStatus::Succeeded) | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCEEDED" => Ok(RunStatus::Succeeded),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// An immutable snapshot of the inputs submitted for a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputVersionRecord {
    pub id: String,
    pub project_id: String,
    pub branch_type: String,
    pub formula_version: String,
    /// `{branch_type, formula_version, inputs}` exactly as fingerprinted.
    pub payload: serde_json::Value,
    /// RFC 3339 timestamp string.
    pub created_at: String,
}

/// One execution attempt against an input version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcRunRecord {
    pub id: String,
    pub input_version_id: String,
    pub inputs_hash: String,
    pub status: RunStatus,
    /// RFC 3339 timestamp string.
    pub started_at: String,
    /// RFC 3339 timestamp string. None while RUNNING.
    pub finished_at: Option<String>,
    /// Present only when FAILED.
    pub error_message: Option<String>,
}

/// The engine's result document for a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcResultRecord {
    pub calc_run_id: String,
    pub result: serde_json::Value,
}

/// Everything the ledger needs to record a failed run, including when the
/// RUNNING row it would have updated was rolled back with its snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub calc_run_id: String,
    pub input_version_id: String,
    pub inputs_hash: String,
    /// RFC 3339 timestamp string.
    pub started_at: String,
    pub error_message: String,
}

impl RunFailure {
    /// The terminal FAILED row this failure produces when no row exists yet.
    pub fn to_record(&self, finished_at: String) -> CalcRunRecord {
        CalcRunRecord {
            id: self.calc_run_id.clone(),
            input_version_id: self.input_version_id.clone(),
            inputs_hash: self.inputs_hash.clone(),
            status: RunStatus::Failed,
            started_at: self.started_at.clone(),
            finished_at: Some(finished_at),
            error_message: Some(self.error_message.clone()),
        }
    }
}

/// Current UTC time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}

pub(crate) fn format_rfc3339(ts: OffsetDateTime) -> String {
    // Rfc3339 formatting only fails for years outside 0..=9999.
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_transitions_to_terminal() {
        assert!(RunStatus::Running.can_transition_to(RunStatus::Succeeded));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Succeeded.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Succeeded));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn status_string_form() {
        assert_eq!(RunStatus::Succeeded.to_string(), "SUCCEEDED");
        assert_eq!("FAILED".parse::<RunStatus>(), Ok(RunStatus::Failed));
        assert!("running".parse::<RunStatus>().is_err());
        assert_eq!(
            serde_json::to_value(RunStatus::Running).unwrap(),
            serde_json::json!("RUNNING")
        );
    }

    #[test]
    fn failure_record_is_terminal() {
        let failure = RunFailure {
            calc_run_id: "run-1".to_string(),
            input_version_id: "iv-1".to_string(),
            inputs_hash: "abc".to_string(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            error_message: "Calc engine error 503: down".to_string(),
        };
        let record = failure.to_record("2026-01-01T00:00:05Z".to_string());
        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.status.is_terminal());
        assert_eq!(record.finished_at.as_deref(), Some("2026-01-01T00:00:05Z"));
        assert_eq!(
            record.error_message.as_deref(),
            Some("Calc engine error 503: down")
        );
    }

    #[test]
    fn now_is_parseable_rfc3339() {
        let now = now_rfc3339();
        assert!(OffsetDateTime::parse(&now, &Rfc3339).is_ok());
    }
}
