//! Conformance test suite for `CalcStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any `CalcStorage`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Input versions**: write-once storage, duplicate detection, stable reads
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Atomic commit**: result and SUCCEEDED status become visible together or not at all
//! - **Run ledger**: RUNNING -> SUCCEEDED | FAILED, never regressing
//! - **Error handling**: correct error variants for invalid operations
//! - **Concurrency**: independent snapshots with fresh ids never interfere
//!
//! Every test generates fresh UUID-based ids, so the suite can run against a
//! shared database without truncating it between tests.
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a storage instance for each test:
//!
//! ```ignore
//! use bersn_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod error;
mod input_version;
mod ledger;
mod snapshot;

use std::fmt;
use std::future::Future;

use crate::record::{now_rfc3339, CalcResultRecord, InputVersionRecord, RunFailure};
use crate::CalcStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "input_version", "snapshot", "ledger").
    pub category: String,
    /// Test name (e.g. "put_then_get_after_commit").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a storage
/// instance. Instances may share underlying data.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(input_version::run_input_version_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(ledger::run_ledger_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: ids and record constructors with sensible defaults ──────────────

fn fresh_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

fn make_input_version(id: &str) -> InputVersionRecord {
    InputVersionRecord {
        id: id.to_string(),
        project_id: "conformance-project".to_string(),
        branch_type: "urban".to_string(),
        formula_version: "v1".to_string(),
        payload: serde_json::json!({
            "branch_type": "urban",
            "formula_version": "v1",
            "inputs": {"x": 1, "nested": {"b": [1, 2], "a": null}},
        }),
        created_at: now_rfc3339(),
    }
}

fn make_result(calc_run_id: &str) -> CalcResultRecord {
    CalcResultRecord {
        calc_run_id: calc_run_id.to_string(),
        result: serde_json::json!({"score": 85, "grade": "Level-1", "outputs": {"EUI": 120}}),
    }
}

fn make_failure(calc_run_id: &str, input_version_id: &str, message: &str) -> RunFailure {
    RunFailure {
        calc_run_id: calc_run_id.to_string(),
        input_version_id: input_version_id.to_string(),
        inputs_hash: "0".repeat(64),
        started_at: now_rfc3339(),
        error_message: message.to_string(),
    }
}

/// Commit an input version and a RUNNING run in one snapshot.
async fn seed_running_run<S: CalcStorage>(
    storage: &S,
    run_id: &str,
    input_version_id: &str,
) -> Result<(), String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .put_input_version(&mut snap, make_input_version(input_version_id))
        .await
        .map_err(|e| format!("put_input_version: {e}"))?;
    storage
        .create_run(&mut snap, run_id, input_version_id, &"0".repeat(64))
        .await
        .map_err(|e| format!("create_run: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}
