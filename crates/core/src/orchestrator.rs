//! Calc-run orchestrator.
//!
//! A submission is driven as a two-phase saga:
//!
//! 1. **Primary phase**, one storage snapshot: store the input version,
//!    insert the run as RUNNING, call the calc engine, store the result and
//!    mark the run SUCCEEDED, then commit. Any failure rolls the whole
//!    snapshot back, so the primary path never leaves a RUNNING row behind.
//! 2. **Compensation**, one independent write: `mark_failed` records the run
//!    as FAILED with the error message. If this write fails it is logged and
//!    swallowed; the caller still receives the original error.
//!
//! The guarantee is therefore not exactly-once: a failed run may end up with
//! no ledger row at all when both the primary phase and the compensating
//! write fail. No submission is ever retried and no fingerprint is reused.

use std::sync::Arc;
use std::time::Duration;

use bersn_storage::{
    now_rfc3339, CalcResultRecord, CalcRunRecord, CalcStorage, InputVersionRecord, RunFailure,
    StorageError,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::engine::{CalcEngine, EngineRequest};
use crate::error::CalcError;
use crate::fingerprint::{canonical_payload, fingerprint};
use crate::submission::{RunDraft, RunSubmission};

/// Default bound on the engine call while the snapshot is held open.
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on one engine exchange. Elapse is reported as unavailable.
    pub engine_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            engine_timeout: DEFAULT_ENGINE_TIMEOUT,
        }
    }
}

/// Successful submission response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub calc_run_id: String,
    pub input_version_id: String,
    pub result: Value,
}

/// A run row together with its result, if it has one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunView {
    pub run: CalcRunRecord,
    pub result: Option<Value>,
}

/// Identifiers and payload fixed before the primary phase starts.
struct RunPlan {
    calc_run_id: String,
    input_version_id: String,
    inputs_hash: String,
    payload: Value,
    submission: RunSubmission,
}

/// How the compensating write ended. Logged, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compensation {
    Recorded,
    Failed,
}

/// Drives calc runs from submission to a terminal ledger state.
///
/// Owns explicit handles to the store and the engine; both are injected at
/// construction and shared across concurrent submissions.
pub struct Orchestrator<S: CalcStorage, E: CalcEngine> {
    storage: Arc<S>,
    engine: Arc<E>,
    config: OrchestratorConfig,
}

impl<S: CalcStorage, E: CalcEngine> Clone for Orchestrator<S, E> {
    fn clone(&self) -> Self {
        Orchestrator {
            storage: Arc::clone(&self.storage),
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
        }
    }
}

impl<S: CalcStorage, E: CalcEngine> Orchestrator<S, E> {
    pub fn new(storage: Arc<S>, engine: Arc<E>, config: OrchestratorConfig) -> Self {
        Orchestrator {
            storage,
            engine,
            config,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Validate, snapshot and execute one calc run.
    ///
    /// Validation failures return before anything is written. Every other
    /// failure rolls back the primary snapshot and is followed by one
    /// best-effort `mark_failed` for the run id.
    pub async fn submit_run(&self, draft: RunDraft) -> Result<RunOutcome, CalcError> {
        let submission = draft.validate()?;
        let payload = canonical_payload(
            &submission.branch_type,
            &submission.formula_version,
            &submission.inputs,
        );
        let inputs_hash = fingerprint(&payload)?;

        let plan = RunPlan {
            calc_run_id: Uuid::new_v4().to_string(),
            input_version_id: Uuid::new_v4().to_string(),
            inputs_hash,
            payload,
            submission,
        };

        tracing::info!(
            calc_run_id = %plan.calc_run_id,
            input_version_id = %plan.input_version_id,
            inputs_hash = %plan.inputs_hash,
            project_id = %plan.submission.project_id,
            engine = self.engine.engine_id(),
            "calc run submitted"
        );

        let mut snapshot = match self.storage.begin_snapshot().await {
            Ok(s) => s,
            Err(e) => {
                let err = CalcError::from(e);
                tracing::error!(
                    calc_run_id = %plan.calc_run_id,
                    error_kind = err.kind().as_str(),
                    error = %err,
                    "could not open snapshot"
                );
                return Err(err);
            }
        };

        // Replaced by the ledger's own timestamp once the RUNNING row exists.
        let mut started_at = now_rfc3339();

        let primary = self
            .primary_phase(&mut snapshot, &plan, &mut started_at)
            .await;

        let outcome = match primary {
            Ok(result) => match self.storage.commit_snapshot(snapshot).await {
                Ok(()) => Ok(result),
                Err(e) => Err(CalcError::from(e)),
            },
            Err(err) => {
                if let Err(abort_err) = self.storage.abort_snapshot(snapshot).await {
                    tracing::warn!(
                        calc_run_id = %plan.calc_run_id,
                        error = %abort_err,
                        "snapshot abort failed"
                    );
                }
                Err(err)
            }
        };

        match outcome {
            Ok(result) => {
                tracing::info!(
                    calc_run_id = %plan.calc_run_id,
                    input_version_id = %plan.input_version_id,
                    "calc run succeeded"
                );
                Ok(RunOutcome {
                    calc_run_id: plan.calc_run_id,
                    input_version_id: plan.input_version_id,
                    result,
                })
            }
            Err(err) => {
                tracing::warn!(
                    calc_run_id = %plan.calc_run_id,
                    input_version_id = %plan.input_version_id,
                    inputs_hash = %plan.inputs_hash,
                    error_kind = err.kind().as_str(),
                    error = %err,
                    "calc run failed; primary snapshot rolled back"
                );
                let compensation = self.compensate(&plan, started_at, &err).await;
                tracing::debug!(
                    calc_run_id = %plan.calc_run_id,
                    ?compensation,
                    "saga finished"
                );
                Err(err)
            }
        }
    }

    /// Every write of the success path, inside one snapshot.
    async fn primary_phase(
        &self,
        snapshot: &mut S::Snapshot,
        plan: &RunPlan,
        started_at: &mut String,
    ) -> Result<Value, CalcError> {
        let submission = &plan.submission;

        self.storage
            .put_input_version(
                snapshot,
                InputVersionRecord {
                    id: plan.input_version_id.clone(),
                    project_id: submission.project_id.clone(),
                    branch_type: submission.branch_type.clone(),
                    formula_version: submission.formula_version.clone(),
                    payload: plan.payload.clone(),
                    created_at: now_rfc3339(),
                },
            )
            .await?;

        let run = self
            .storage
            .create_run(
                snapshot,
                &plan.calc_run_id,
                &plan.input_version_id,
                &plan.inputs_hash,
            )
            .await?;
        *started_at = run.started_at;

        let request = EngineRequest {
            calc_run_id: plan.calc_run_id.clone(),
            branch_type: submission.branch_type.clone(),
            formula_version: submission.formula_version.clone(),
            inputs: submission.inputs.clone(),
        };
        let result = self.call_engine(&request).await?;

        self.storage
            .insert_result(
                snapshot,
                CalcResultRecord {
                    calc_run_id: plan.calc_run_id.clone(),
                    result: result.clone(),
                },
            )
            .await?;
        self.storage
            .mark_succeeded(snapshot, &plan.calc_run_id)
            .await?;

        Ok(result)
    }

    async fn call_engine(&self, request: &EngineRequest) -> Result<Value, CalcError> {
        let timeout = self.config.engine_timeout;
        match tokio::time::timeout(timeout, self.engine.invoke(request)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(CalcError::from(e)),
            Err(_) => Err(CalcError::Unavailable {
                message: format!("no response within {} ms", timeout.as_millis()),
            }),
        }
    }

    /// The saga's compensating step. Errors end here.
    async fn compensate(&self, plan: &RunPlan, started_at: String, err: &CalcError) -> Compensation {
        let failure = RunFailure {
            calc_run_id: plan.calc_run_id.clone(),
            input_version_id: plan.input_version_id.clone(),
            inputs_hash: plan.inputs_hash.clone(),
            started_at,
            error_message: err.to_string(),
        };

        match self.storage.mark_failed(&failure).await {
            Ok(()) => {
                tracing::info!(
                    calc_run_id = %plan.calc_run_id,
                    "run recorded as FAILED"
                );
                Compensation::Recorded
            }
            Err(e) => {
                tracing::error!(
                    calc_run_id = %plan.calc_run_id,
                    original_error = %err,
                    error = %e,
                    "compensating mark_failed did not persist; run has no ledger row"
                );
                Compensation::Failed
            }
        }
    }

    /// The run row and, when it SUCCEEDED, its result.
    pub async fn describe_run(&self, calc_run_id: &str) -> Result<RunView, CalcError> {
        let run = self.storage.get_run(calc_run_id).await?;
        let result = match self.storage.get_result(calc_run_id).await {
            Ok(record) => Some(record.result),
            Err(StorageError::ResultNotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(RunView { run, result })
    }

    pub async fn describe_input_version(&self, id: &str) -> Result<InputVersionRecord, CalcError> {
        Ok(self.storage.get_input_version(id).await?)
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use bersn_storage::{MemorySnapshot, MemoryStorage, RunStatus};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Engine that answers every call with the same canned outcome.
    struct StubEngine {
        reply: Result<Value, EngineError>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        last_request: Mutex<Option<EngineRequest>>,
    }

    impl StubEngine {
        fn ok(result: Value) -> Self {
            Self::with(Ok(result))
        }

        fn err(error: EngineError) -> Self {
            Self::with(Err(error))
        }

        fn with(reply: Result<Value, EngineError>) -> Self {
            StubEngine {
                reply,
                delay: None,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl CalcEngine for StubEngine {
        async fn invoke(&self, request: &EngineRequest) -> Result<Value, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone()
        }

        fn engine_id(&self) -> &str {
            "stub"
        }
    }

    /// Memory store whose compensating write and/or commit can be made to fail.
    #[derive(Default)]
    struct FaultyStorage {
        inner: MemoryStorage,
        fail_commit: bool,
        fail_mark_failed: bool,
    }

    #[async_trait]
    impl CalcStorage for FaultyStorage {
        type Snapshot = MemorySnapshot;

        async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
            self.inner.begin_snapshot().await
        }
        async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
            if self.fail_commit {
                drop(snapshot);
                return Err(StorageError::Backend("commit lost".to_string()));
            }
            self.inner.commit_snapshot(snapshot).await
        }
        async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
            self.inner.abort_snapshot(snapshot).await
        }
        async fn put_input_version(
            &self,
            snapshot: &mut MemorySnapshot,
            record: InputVersionRecord,
        ) -> Result<(), StorageError> {
            self.inner.put_input_version(snapshot, record).await
        }
        async fn create_run(
            &self,
            snapshot: &mut MemorySnapshot,
            id: &str,
            input_version_id: &str,
            inputs_hash: &str,
        ) -> Result<CalcRunRecord, StorageError> {
            self.inner
                .create_run(snapshot, id, input_version_id, inputs_hash)
                .await
        }
        async fn insert_result(
            &self,
            snapshot: &mut MemorySnapshot,
            record: CalcResultRecord,
        ) -> Result<(), StorageError> {
            self.inner.insert_result(snapshot, record).await
        }
        async fn mark_succeeded(
            &self,
            snapshot: &mut MemorySnapshot,
            id: &str,
        ) -> Result<(), StorageError> {
            self.inner.mark_succeeded(snapshot, id).await
        }
        async fn mark_failed(&self, failure: &RunFailure) -> Result<(), StorageError> {
            if self.fail_mark_failed {
                return Err(StorageError::Backend("ledger offline".to_string()));
            }
            self.inner.mark_failed(failure).await
        }
        async fn get_input_version(&self, id: &str) -> Result<InputVersionRecord, StorageError> {
            self.inner.get_input_version(id).await
        }
        async fn get_run(&self, id: &str) -> Result<CalcRunRecord, StorageError> {
            self.inner.get_run(id).await
        }
        async fn get_result(&self, calc_run_id: &str) -> Result<CalcResultRecord, StorageError> {
            self.inner.get_result(calc_run_id).await
        }
        async fn ping(&self) -> Result<(), StorageError> {
            self.inner.ping().await
        }
    }

    fn orchestrator<S: CalcStorage>(
        storage: S,
        engine: StubEngine,
    ) -> (Orchestrator<S, StubEngine>, Arc<S>, Arc<StubEngine>) {
        let storage = Arc::new(storage);
        let engine = Arc::new(engine);
        let orch = Orchestrator::new(
            Arc::clone(&storage),
            Arc::clone(&engine),
            OrchestratorConfig::default(),
        );
        (orch, storage, engine)
    }

    fn draft(project_id: &str) -> RunDraft {
        RunDraft::from_body(&json!({
            "project_id": project_id,
            "branch_type": "urban",
            "formula_version": "v1",
            "inputs": {"x": 1},
        }))
    }

    #[tokio::test]
    async fn successful_run_commits_everything() {
        let (orch, storage, engine) =
            orchestrator(MemoryStorage::new(), StubEngine::ok(json!({"total": 42})));

        let outcome = orch.submit_run(draft("p1")).await.unwrap();
        assert_eq!(outcome.result, json!({"total": 42}));

        let run = storage.get_run(&outcome.calc_run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.input_version_id, outcome.input_version_id);
        assert!(run.finished_at.is_some());
        assert!(run.error_message.is_none());

        let result = storage.get_result(&outcome.calc_run_id).await.unwrap();
        assert_eq!(result.result, json!({"total": 42}));

        let iv = storage
            .get_input_version(&outcome.input_version_id)
            .await
            .unwrap();
        assert_eq!(iv.project_id, "p1");
        assert_eq!(
            iv.payload,
            json!({"branch_type": "urban", "formula_version": "v1", "inputs": {"x": 1}})
        );
        assert_eq!(run.inputs_hash, fingerprint(&iv.payload).unwrap());

        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        let sent = engine.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(sent.calc_run_id, outcome.calc_run_id);
        assert_eq!(sent.branch_type, "urban");
    }

    #[tokio::test]
    async fn missing_inputs_writes_nothing() {
        let (orch, storage, engine) =
            orchestrator(MemoryStorage::new(), StubEngine::ok(json!({})));

        let body = json!({"project_id": "p1", "branch_type": "urban", "formula_version": "v1"});
        let err = orch.submit_run(RunDraft::from_body(&body)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.is_client_error());
        assert_eq!(storage.run_count(), 0);
        assert_eq!(storage.input_version_count(), 0);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_error_marks_run_failed_without_result() {
        let (orch, storage, _) = orchestrator(
            MemoryStorage::new(),
            StubEngine::err(EngineError::Remote {
                status_code: 503,
                body: "Service Unavailable".to_string(),
            }),
        );

        let err = orch.submit_run(draft("p1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(!err.is_client_error());

        // The compensating write is the only surviving row.
        assert_eq!(storage.run_count(), 1);
        assert_eq!(storage.input_version_count(), 0);
        assert_eq!(storage.result_count(), 0);

        let ids = storage.run_ids();
        let run = storage.get_run(&ids[0]).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let message = run.error_message.unwrap();
        assert!(message.contains("503"), "{message}");
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn identical_payloads_get_distinct_runs_and_equal_hashes() {
        let (orch, storage, _) = orchestrator(MemoryStorage::new(), StubEngine::ok(json!({"total": 1})));

        let a = orch.submit_run(draft("p1")).await.unwrap();
        let b = orch.submit_run(draft("p2")).await.unwrap();

        assert_ne!(a.calc_run_id, b.calc_run_id);
        assert_ne!(a.input_version_id, b.input_version_id);

        let run_a = storage.get_run(&a.calc_run_id).await.unwrap();
        let run_b = storage.get_run(&b.calc_run_id).await.unwrap();
        assert_eq!(run_a.inputs_hash, run_b.inputs_hash);
    }

    #[tokio::test]
    async fn unavailable_engine_leaves_no_running_row() {
        let (orch, storage, _) = orchestrator(
            MemoryStorage::new(),
            StubEngine::err(EngineError::Unavailable {
                message: "connection refused".to_string(),
            }),
        );

        let err = orch.submit_run(draft("p1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        for id in storage.run_ids() {
            let run = storage.get_run(&id).await.unwrap();
            assert_ne!(run.status, RunStatus::Running);
        }
    }

    #[tokio::test]
    async fn slow_engine_is_cut_off_as_unavailable() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = Arc::new(StubEngine::ok(json!({})).slow(Duration::from_secs(5)));
        let orch = Orchestrator::new(
            Arc::clone(&storage),
            engine,
            OrchestratorConfig {
                engine_timeout: Duration::from_millis(50),
            },
        );

        let err = orch.submit_run(draft("p1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(storage.result_count(), 0);
        assert_eq!(storage.input_version_count(), 0);
    }

    #[tokio::test]
    async fn compensation_failure_is_swallowed() {
        let storage = FaultyStorage {
            fail_mark_failed: true,
            ..Default::default()
        };
        let (orch, storage, _) = orchestrator(
            storage,
            StubEngine::err(EngineError::Remote {
                status_code: 500,
                body: "boom".to_string(),
            }),
        );

        let err = orch.submit_run(draft("p1")).await.unwrap_err();
        // The caller sees the engine failure, not the ledger failure.
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert_eq!(err.to_string(), "Calc engine error 500: boom");
        assert_eq!(storage.inner.run_count(), 0);
    }

    #[tokio::test]
    async fn commit_failure_is_compensated() {
        let storage = FaultyStorage {
            fail_commit: true,
            ..Default::default()
        };
        let (orch, storage, _) = orchestrator(storage, StubEngine::ok(json!({"total": 42})));

        let err = orch.submit_run(draft("p1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(storage.inner.result_count(), 0);
        assert_eq!(storage.inner.run_count(), 1);

        let id = storage.inner.run_ids().remove(0);
        let run = storage.get_run(&id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("storage backend error: commit lost"));
    }

    #[tokio::test]
    async fn describe_run_includes_result_only_on_success() {
        let (ok_orch, _, _) = orchestrator(MemoryStorage::new(), StubEngine::ok(json!({"total": 7})));
        let outcome = ok_orch.submit_run(draft("p1")).await.unwrap();
        let view = ok_orch.describe_run(&outcome.calc_run_id).await.unwrap();
        assert_eq!(view.run.status, RunStatus::Succeeded);
        assert_eq!(view.result, Some(json!({"total": 7})));

        let (bad_orch, storage, _) = orchestrator(
            MemoryStorage::new(),
            StubEngine::err(EngineError::Remote {
                status_code: 502,
                body: String::new(),
            }),
        );
        let _ = bad_orch.submit_run(draft("p1")).await;
        let id = storage.run_ids().remove(0);
        let view = bad_orch.describe_run(&id).await.unwrap();
        assert_eq!(view.run.status, RunStatus::Failed);
        assert!(view.result.is_none());
    }

    #[tokio::test]
    async fn describe_unknown_run_is_not_found() {
        let (orch, _, _) = orchestrator(MemoryStorage::new(), StubEngine::ok(json!({})));
        let err = orch.describe_run("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
