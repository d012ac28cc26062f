//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, and aborted or dropped writes are discarded.

use std::future::Future;

use super::{fresh_id, make_input_version, TestResult};
use crate::{CalcStorage, RunStatus, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "empty_snapshot_commits",
        empty_snapshot_commits(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "empty_snapshot_aborts",
        empty_snapshot_aborts(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_input_version_invisible",
        uncommitted_input_version_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_run_invisible",
        uncommitted_run_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_discards_input_version_and_run",
        abort_discards_input_version_and_run(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_discards_writes",
        dropped_snapshot_discards_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "committed_run_is_running_without_finish",
        committed_run_is_running_without_finish(factory).await,
    ));

    results
}

async fn empty_snapshot_commits<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}

async fn empty_snapshot_aborts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))
}

async fn uncommitted_input_version_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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

    let seen = s.get_input_version(&id).await;
    let _ = s.abort_snapshot(snap).await;
    match seen {
        Err(StorageError::InputVersionNotFound { .. }) => Ok(()),
        other => Err(format!(
            "uncommitted input version visible outside snapshot: {:?}",
            other
        )),
    }
}

async fn uncommitted_run_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let run_id = fresh_id("run");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.create_run(&mut snap, &run_id, &fresh_id("iv"), "hash")
        .await
        .map_err(|e| format!("create_run: {e}"))?;

    let seen = s.get_run(&run_id).await;
    let _ = s.abort_snapshot(snap).await;
    match seen {
        Err(StorageError::RunNotFound { .. }) => Ok(()),
        other => Err(format!("uncommitted run visible outside snapshot: {:?}", other)),
    }
}

async fn abort_discards_input_version_and_run<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    let run_id = fresh_id("run");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.put_input_version(&mut snap, make_input_version(&iv_id))
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.create_run(&mut snap, &run_id, &iv_id, "hash")
        .await
        .map_err(|e| format!("create_run: {e}"))?;
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    if s.get_input_version(&iv_id).await.is_ok() {
        return Err("input version visible after abort".to_string());
    }
    if s.get_run(&run_id).await.is_ok() {
        return Err("run visible after abort".to_string());
    }
    Ok(())
}

async fn dropped_snapshot_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    {
        let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
        s.put_input_version(&mut snap, make_input_version(&iv_id))
            .await
            .map_err(|e| format!("put: {e}"))?;
    }

    match s.get_input_version(&iv_id).await {
        Err(StorageError::InputVersionNotFound { .. }) => Ok(()),
        other => Err(format!("dropped snapshot left a write behind: {:?}", other)),
    }
}

async fn committed_run_is_running_without_finish<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    let run_id = fresh_id("run");
    super::seed_running_run(&s, &run_id, &iv_id).await?;

    let run = s.get_run(&run_id).await.map_err(|e| format!("get: {e}"))?;
    if run.status != RunStatus::Running {
        return Err(format!("expected RUNNING, got {}", run.status));
    }
    if run.finished_at.is_some() {
        return Err("finished_at set on a RUNNING run".to_string());
    }
    if run.error_message.is_some() {
        return Err("error_message set on a RUNNING run".to_string());
    }
    if run.input_version_id != iv_id {
        return Err(format!(
            "expected input_version_id {iv_id}, got {}",
            run.input_version_id
        ));
    }
    Ok(())
}
