//! In-process `CalcStorage` backend.
//!
//! Snapshots buffer their writes privately and apply them under a single
//! lock at commit time, so uncommitted writes are invisible to every other
//! reader and an aborted or dropped snapshot leaves no trace. Constraints are
//! checked both when a write is buffered and again at commit, because a
//! concurrent snapshot may have committed the same id in between.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    now_rfc3339, CalcResultRecord, CalcRunRecord, InputVersionRecord, RunFailure, RunStatus,
};
use crate::traits::CalcStorage;

/// Committed state shared by all handles to one store.
#[derive(Debug, Default)]
struct MemoryState {
    input_versions: HashMap<String, InputVersionRecord>,
    runs: HashMap<String, CalcRunRecord>,
    results: HashMap<String, CalcResultRecord>,
}

/// A run row touched inside a snapshot.
#[derive(Debug)]
struct PendingRun {
    record: CalcRunRecord,
    /// True if the snapshot inserted the row, false if it updates a committed one.
    inserted: bool,
}

/// Buffered writes of one open snapshot.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    input_versions: BTreeMap<String, InputVersionRecord>,
    runs: BTreeMap<String, PendingRun>,
    results: BTreeMap<String, CalcResultRecord>,
}

/// Process-local store. Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }

    /// Number of committed runs. Handy for asserting "no rows written".
    pub fn run_count(&self) -> usize {
        self.state().map(|s| s.runs.len()).unwrap_or(0)
    }

    /// Number of committed input versions.
    pub fn input_version_count(&self) -> usize {
        self.state().map(|s| s.input_versions.len()).unwrap_or(0)
    }

    /// Number of committed results.
    pub fn result_count(&self) -> usize {
        self.state().map(|s| s.results.len()).unwrap_or(0)
    }

    /// Ids of all committed runs, sorted.
    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state()
            .map(|s| s.runs.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

/// Validate a snapshot against committed state without applying it.
fn check_commit(state: &MemoryState, snapshot: &MemorySnapshot) -> Result<(), StorageError> {
    for id in snapshot.input_versions.keys() {
        if state.input_versions.contains_key(id) {
            return Err(StorageError::InputVersionExists { id: id.clone() });
        }
    }
    for (id, pending) in &snapshot.runs {
        match state.runs.get(id) {
            Some(_) if pending.inserted => {
                return Err(StorageError::RunExists { id: id.clone() });
            }
            Some(committed) if !committed.status.can_transition_to(pending.record.status) => {
                return Err(StorageError::InvalidTransition {
                    calc_run_id: id.clone(),
                    from: committed.status,
                    to: pending.record.status,
                });
            }
            None if !pending.inserted => {
                return Err(StorageError::RunNotFound { id: id.clone() });
            }
            _ => {}
        }
    }
    for calc_run_id in snapshot.results.keys() {
        if state.results.contains_key(calc_run_id) {
            return Err(StorageError::ResultExists {
                calc_run_id: calc_run_id.clone(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl CalcStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut state = self.state()?;
        check_commit(&state, &snapshot)?;

        state.input_versions.extend(snapshot.input_versions);
        for (id, pending) in snapshot.runs {
            state.runs.insert(id, pending.record);
        }
        state.results.extend(snapshot.results);
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn put_input_version(
        &self,
        snapshot: &mut MemorySnapshot,
        record: InputVersionRecord,
    ) -> Result<(), StorageError> {
        let exists = snapshot.input_versions.contains_key(&record.id)
            || self.state()?.input_versions.contains_key(&record.id);
        if exists {
            return Err(StorageError::InputVersionExists { id: record.id });
        }
        snapshot.input_versions.insert(record.id.clone(), record);
        Ok(())
    }

    async fn create_run(
        &self,
        snapshot: &mut MemorySnapshot,
        id: &str,
        input_version_id: &str,
        inputs_hash: &str,
    ) -> Result<CalcRunRecord, StorageError> {
        let exists = snapshot.runs.contains_key(id) || self.state()?.runs.contains_key(id);
        if exists {
            return Err(StorageError::RunExists { id: id.to_string() });
        }
        let record = CalcRunRecord {
            id: id.to_string(),
            input_version_id: input_version_id.to_string(),
            inputs_hash: inputs_hash.to_string(),
            status: RunStatus::Running,
            started_at: now_rfc3339(),
            finished_at: None,
            error_message: None,
        };
        snapshot.runs.insert(
            id.to_string(),
            PendingRun {
                record: record.clone(),
                inserted: true,
            },
        );
        Ok(record)
    }

    async fn insert_result(
        &self,
        snapshot: &mut MemorySnapshot,
        record: CalcResultRecord,
    ) -> Result<(), StorageError> {
        let (run_known, result_exists) = {
            let state = self.state()?;
            (
                state.runs.contains_key(&record.calc_run_id),
                state.results.contains_key(&record.calc_run_id),
            )
        };
        if result_exists || snapshot.results.contains_key(&record.calc_run_id) {
            return Err(StorageError::ResultExists {
                calc_run_id: record.calc_run_id,
            });
        }
        if !run_known && !snapshot.runs.contains_key(&record.calc_run_id) {
            return Err(StorageError::RunNotFound {
                id: record.calc_run_id,
            });
        }
        snapshot.results.insert(record.calc_run_id.clone(), record);
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        snapshot: &mut MemorySnapshot,
        id: &str,
    ) -> Result<(), StorageError> {
        if !snapshot.runs.contains_key(id) {
            let committed = self
                .state()?
                .runs
                .get(id)
                .cloned()
                .ok_or_else(|| StorageError::RunNotFound { id: id.to_string() })?;
            snapshot.runs.insert(
                id.to_string(),
                PendingRun {
                    record: committed,
                    inserted: false,
                },
            );
        }

        let pending = snapshot
            .runs
            .get_mut(id)
            .ok_or_else(|| StorageError::RunNotFound { id: id.to_string() })?;
        if !pending.record.status.can_transition_to(RunStatus::Succeeded) {
            return Err(StorageError::InvalidTransition {
                calc_run_id: id.to_string(),
                from: pending.record.status,
                to: RunStatus::Succeeded,
            });
        }
        pending.record.status = RunStatus::Succeeded;
        pending.record.finished_at = Some(now_rfc3339());
        Ok(())
    }

    async fn mark_failed(&self, failure: &RunFailure) -> Result<(), StorageError> {
        let mut state = self.state()?;
        match state.runs.get_mut(&failure.calc_run_id) {
            Some(run) if run.status.can_transition_to(RunStatus::Failed) => {
                run.status = RunStatus::Failed;
                run.finished_at = Some(now_rfc3339());
                run.error_message = Some(failure.error_message.clone());
                Ok(())
            }
            Some(run) => Err(StorageError::InvalidTransition {
                calc_run_id: failure.calc_run_id.clone(),
                from: run.status,
                to: RunStatus::Failed,
            }),
            None => {
                let record = failure.to_record(now_rfc3339());
                state.runs.insert(record.id.clone(), record);
                Ok(())
            }
        }
    }

    async fn get_input_version(&self, id: &str) -> Result<InputVersionRecord, StorageError> {
        self.state()?
            .input_versions
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::InputVersionNotFound { id: id.to_string() })
    }

    async fn get_run(&self, id: &str) -> Result<CalcRunRecord, StorageError> {
        self.state()?
            .runs
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::RunNotFound { id: id.to_string() })
    }

    async fn get_result(&self, calc_run_id: &str) -> Result<CalcResultRecord, StorageError> {
        self.state()?
            .results
            .get(calc_run_id)
            .cloned()
            .ok_or_else(|| StorageError::ResultNotFound {
                calc_run_id: calc_run_id.to_string(),
            })
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.state().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_version(id: &str) -> InputVersionRecord {
        InputVersionRecord {
            id: id.to_string(),
            project_id: "p1".to_string(),
            branch_type: "urban".to_string(),
            formula_version: "v1".to_string(),
            payload: serde_json::json!({"branch_type": "urban", "formula_version": "v1", "inputs": {"x": 1}}),
            created_at: now_rfc3339(),
        }
    }

    #[tokio::test]
    async fn commit_rejects_id_committed_by_concurrent_snapshot() {
        let storage = MemoryStorage::new();

        let mut first = storage.begin_snapshot().await.unwrap();
        let mut second = storage.begin_snapshot().await.unwrap();
        storage
            .put_input_version(&mut first, input_version("iv-1"))
            .await
            .unwrap();
        storage
            .put_input_version(&mut second, input_version("iv-1"))
            .await
            .unwrap();

        storage.commit_snapshot(first).await.unwrap();
        let err = storage.commit_snapshot(second).await.unwrap_err();
        assert!(matches!(err, StorageError::InputVersionExists { .. }));
        assert_eq!(storage.input_version_count(), 1);
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let storage = MemoryStorage::new();

        let mut seed = storage.begin_snapshot().await.unwrap();
        storage
            .put_input_version(&mut seed, input_version("iv-taken"))
            .await
            .unwrap();

        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .put_input_version(&mut snap, input_version("iv-taken"))
            .await
            .unwrap();
        storage
            .create_run(&mut snap, "run-1", "iv-taken", "hash")
            .await
            .unwrap();

        storage.commit_snapshot(seed).await.unwrap();
        assert!(storage.commit_snapshot(snap).await.is_err());
        assert_eq!(storage.run_count(), 0);
    }

    #[tokio::test]
    async fn dropped_snapshot_is_rolled_back() {
        let storage = MemoryStorage::new();
        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage
                .create_run(&mut snap, "run-dropped", "iv-1", "hash")
                .await
                .unwrap();
        }
        assert!(matches!(
            storage.get_run("run-dropped").await,
            Err(StorageError::RunNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn clones_share_committed_state() {
        let storage = MemoryStorage::new();
        let other = storage.clone();

        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .create_run(&mut snap, "run-shared", "iv-1", "hash")
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        let run = other.get_run("run-shared").await.unwrap();
        assert_eq!(run.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn result_requires_known_run() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        let err = storage
            .insert_result(
                &mut snap,
                CalcResultRecord {
                    calc_run_id: "ghost".to_string(),
                    result: serde_json::json!({}),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::RunNotFound { .. }));
    }
}
