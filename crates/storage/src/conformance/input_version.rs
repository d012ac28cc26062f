//! Input Version Store conformance tests.
//!
//! Input versions are write-once: stored exactly as submitted, never
//! overwritten, and read back identically every time.

use std::future::Future;

use super::{fresh_id, make_input_version, TestResult};
use crate::{CalcStorage, StorageError};

pub(super) async fn run_input_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "input_version",
        "put_then_get_after_commit",
        put_then_get_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "input_version",
        "payload_preserved_exactly",
        payload_preserved_exactly(factory).await,
    ));
    results.push(TestResult::from_result(
        "input_version",
        "duplicate_id_in_same_snapshot_rejected",
        duplicate_id_in_same_snapshot_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "input_version",
        "duplicate_id_across_snapshots_rejected",
        duplicate_id_across_snapshots_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "input_version",
        "rejected_duplicate_leaves_original_unchanged",
        rejected_duplicate_leaves_original_unchanged(factory).await,
    ));
    results.push(TestResult::from_result(
        "input_version",
        "repeated_reads_identical",
        repeated_reads_identical(factory).await,
    ));

    results
}

async fn put_then_get_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = fresh_id("iv");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.put_input_version(&mut snap, make_input_version(&id))
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let record = s
        .get_input_version(&id)
        .await
        .map_err(|e| format!("get: {e}"))?;
    if record.id != id {
        return Err(format!("expected id {id}, got {}", record.id));
    }
    if record.project_id != "conformance-project" {
        return Err(format!("unexpected project_id {}", record.project_id));
    }
    if record.branch_type != "urban" || record.formula_version != "v1" {
        return Err(format!(
            "unexpected branch/formula {}/{}",
            record.branch_type, record.formula_version
        ));
    }
    Ok(())
}

async fn payload_preserved_exactly<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = fresh_id("iv");
    let original = make_input_version(&id);
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.put_input_version(&mut snap, original.clone())
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let stored = s
        .get_input_version(&id)
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.payload != original.payload {
        return Err(format!(
            "payload changed: stored {} vs submitted {}",
            stored.payload, original.payload
        ));
    }
    Ok(())
}

async fn duplicate_id_in_same_snapshot_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = fresh_id("iv");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.put_input_version(&mut snap, make_input_version(&id))
        .await
        .map_err(|e| format!("first put: {e}"))?;
    let second = s.put_input_version(&mut snap, make_input_version(&id)).await;
    let _ = s.abort_snapshot(snap).await;
    match second {
        Err(StorageError::InputVersionExists { id: got }) if got == id => Ok(()),
        other => Err(format!("expected InputVersionExists, got {:?}", other)),
    }
}

async fn duplicate_id_across_snapshots_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = fresh_id("iv");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.put_input_version(&mut snap, make_input_version(&id))
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let mut snap2 = s
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin 2: {e}"))?;
    let second = s.put_input_version(&mut snap2, make_input_version(&id)).await;
    let _ = s.abort_snapshot(snap2).await;
    match second {
        Err(StorageError::InputVersionExists { .. }) => Ok(()),
        other => Err(format!("expected InputVersionExists, got {:?}", other)),
    }
}

async fn rejected_duplicate_leaves_original_unchanged<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = fresh_id("iv");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.put_input_version(&mut snap, make_input_version(&id))
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    let before = s
        .get_input_version(&id)
        .await
        .map_err(|e| format!("get before: {e}"))?;

    let mut overwrite = make_input_version(&id);
    overwrite.project_id = "someone-else".to_string();
    overwrite.payload = serde_json::json!({"tampered": true});
    let mut snap2 = s
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin 2: {e}"))?;
    if s.put_input_version(&mut snap2, overwrite).await.is_ok() {
        let _ = s.abort_snapshot(snap2).await;
        return Err("overwrite of existing input version was accepted".to_string());
    }
    let _ = s.abort_snapshot(snap2).await;

    let after = s
        .get_input_version(&id)
        .await
        .map_err(|e| format!("get after: {e}"))?;
    if before != after {
        return Err(format!("input version changed: {:?} -> {:?}", before, after));
    }
    Ok(())
}

async fn repeated_reads_identical<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = fresh_id("iv");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.put_input_version(&mut snap, make_input_version(&id))
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let first = s
        .get_input_version(&id)
        .await
        .map_err(|e| format!("first read: {e}"))?;
    for i in 0..3 {
        let again = s
            .get_input_version(&id)
            .await
            .map_err(|e| format!("read {i}: {e}"))?;
        if again != first {
            return Err(format!("read {i} differs from first read"));
        }
    }
    Ok(())
}
