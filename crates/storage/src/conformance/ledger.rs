//! Run ledger state-machine conformance tests.
//!
//! A run's observed status sequence must be a prefix of
//! RUNNING -> {SUCCEEDED | FAILED}, with at most one terminal transition.

use std::future::Future;

use super::{fresh_id, make_failure, make_result, seed_running_run, TestResult};
use crate::{CalcStorage, RunStatus, StorageError};

pub(super) async fn run_ledger_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "ledger",
        "create_run_returns_running_row",
        create_run_returns_running_row(factory).await,
    ));
    results.push(TestResult::from_result(
        "ledger",
        "mark_failed_transitions_running_row",
        mark_failed_transitions_running_row(factory).await,
    ));
    results.push(TestResult::from_result(
        "ledger",
        "mark_failed_recreates_rolled_back_row",
        mark_failed_recreates_rolled_back_row(factory).await,
    ));
    results.push(TestResult::from_result(
        "ledger",
        "mark_failed_on_succeeded_rejected",
        mark_failed_on_succeeded_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "ledger",
        "mark_failed_twice_rejected",
        mark_failed_twice_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "ledger",
        "mark_succeeded_on_failed_rejected",
        mark_succeeded_on_failed_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "ledger",
        "mark_succeeded_twice_rejected",
        mark_succeeded_twice_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "ledger",
        "failed_run_has_no_result",
        failed_run_has_no_result(factory).await,
    ));

    results
}

async fn create_run_returns_running_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let run_id = fresh_id("run");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let created = s
        .create_run(&mut snap, &run_id, "iv-x", "abc123")
        .await
        .map_err(|e| format!("create_run: {e}"))?;
    let _ = s.abort_snapshot(snap).await;

    if created.status != RunStatus::Running {
        return Err(format!("expected RUNNING, got {}", created.status));
    }
    if created.id != run_id || created.inputs_hash != "abc123" {
        return Err(format!("returned row has wrong identity: {:?}", created));
    }
    if created.started_at.is_empty() {
        return Err("started_at not set".to_string());
    }
    if created.finished_at.is_some() {
        return Err("finished_at set on new run".to_string());
    }
    Ok(())
}

async fn mark_failed_transitions_running_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    let run_id = fresh_id("run");
    seed_running_run(&s, &run_id, &iv_id).await?;

    s.mark_failed(&make_failure(&run_id, &iv_id, "engine exploded"))
        .await
        .map_err(|e| format!("mark_failed: {e}"))?;

    let run = s.get_run(&run_id).await.map_err(|e| format!("get: {e}"))?;
    if run.status != RunStatus::Failed {
        return Err(format!("expected FAILED, got {}", run.status));
    }
    if run.error_message.as_deref() != Some("engine exploded") {
        return Err(format!("unexpected error_message {:?}", run.error_message));
    }
    if run.finished_at.is_none() {
        return Err("finished_at missing on FAILED run".to_string());
    }
    if run.input_version_id != iv_id {
        return Err("mark_failed rewrote input_version_id".to_string());
    }
    Ok(())
}

async fn mark_failed_recreates_rolled_back_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    let run_id = fresh_id("run");

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.create_run(&mut snap, &run_id, &iv_id, "hash")
        .await
        .map_err(|e| format!("create_run: {e}"))?;
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    let failure = make_failure(&run_id, &iv_id, "Calc engine error 503: unavailable");
    s.mark_failed(&failure)
        .await
        .map_err(|e| format!("mark_failed: {e}"))?;

    let run = s.get_run(&run_id).await.map_err(|e| format!("get: {e}"))?;
    if run.status != RunStatus::Failed {
        return Err(format!("expected FAILED, got {}", run.status));
    }
    if run.inputs_hash != failure.inputs_hash || run.input_version_id != iv_id {
        return Err(format!("recreated row lost its identity: {:?}", run));
    }
    if run.finished_at.is_none() {
        return Err("finished_at missing on recreated FAILED run".to_string());
    }
    if s.get_input_version(&iv_id).await.is_ok() {
        return Err("mark_failed resurrected the rolled-back input version".to_string());
    }
    Ok(())
}

async fn mark_failed_on_succeeded_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    let run_id = fresh_id("run");
    seed_running_run(&s, &run_id, &iv_id).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_result(&mut snap, make_result(&run_id))
        .await
        .map_err(|e| format!("insert_result: {e}"))?;
    s.mark_succeeded(&mut snap, &run_id)
        .await
        .map_err(|e| format!("mark_succeeded: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let result = s.mark_failed(&make_failure(&run_id, &iv_id, "late")).await;
    match result {
        Err(StorageError::InvalidTransition {
            from: RunStatus::Succeeded,
            to: RunStatus::Failed,
            ..
        }) => {}
        other => return Err(format!("expected InvalidTransition, got {:?}", other)),
    }

    let run = s.get_run(&run_id).await.map_err(|e| format!("get: {e}"))?;
    if run.status != RunStatus::Succeeded {
        return Err(format!("status regressed to {}", run.status));
    }
    Ok(())
}

async fn mark_failed_twice_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    let run_id = fresh_id("run");
    seed_running_run(&s, &run_id, &iv_id).await?;

    s.mark_failed(&make_failure(&run_id, &iv_id, "first"))
        .await
        .map_err(|e| format!("first mark_failed: {e}"))?;
    match s
        .mark_failed(&make_failure(&run_id, &iv_id, "second"))
        .await
    {
        Err(StorageError::InvalidTransition { .. }) => {}
        other => return Err(format!("expected InvalidTransition, got {:?}", other)),
    }

    let run = s.get_run(&run_id).await.map_err(|e| format!("get: {e}"))?;
    if run.error_message.as_deref() != Some("first") {
        return Err(format!(
            "second failure overwrote the first: {:?}",
            run.error_message
        ));
    }
    Ok(())
}

async fn mark_succeeded_on_failed_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    let run_id = fresh_id("run");
    seed_running_run(&s, &run_id, &iv_id).await?;
    s.mark_failed(&make_failure(&run_id, &iv_id, "boom"))
        .await
        .map_err(|e| format!("mark_failed: {e}"))?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.mark_succeeded(&mut snap, &run_id).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::InvalidTransition {
            from: RunStatus::Failed,
            to: RunStatus::Succeeded,
            ..
        }) => Ok(()),
        other => Err(format!("expected InvalidTransition, got {:?}", other)),
    }
}

async fn mark_succeeded_twice_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let run_id = fresh_id("run");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.create_run(&mut snap, &run_id, "iv-x", "hash")
        .await
        .map_err(|e| format!("create_run: {e}"))?;
    s.mark_succeeded(&mut snap, &run_id)
        .await
        .map_err(|e| format!("first mark_succeeded: {e}"))?;
    let second = s.mark_succeeded(&mut snap, &run_id).await;
    let _ = s.abort_snapshot(snap).await;
    match second {
        Err(StorageError::InvalidTransition { .. }) => Ok(()),
        other => Err(format!("expected InvalidTransition, got {:?}", other)),
    }
}

async fn failed_run_has_no_result<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let run_id = fresh_id("run");
    s.mark_failed(&make_failure(&run_id, &fresh_id("iv"), "nope"))
        .await
        .map_err(|e| format!("mark_failed: {e}"))?;
    match s.get_result(&run_id).await {
        Err(StorageError::ResultNotFound { .. }) => Ok(()),
        other => Err(format!("expected ResultNotFound, got {:?}", other)),
    }
}
