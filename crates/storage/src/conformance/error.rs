use std::future::Future;

use super::{fresh_id, make_result, TestResult};
use crate::{CalcStorage, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "get_input_version_nonexistent",
        get_input_version_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_run_nonexistent",
        get_run_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_result_nonexistent",
        get_result_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "mark_succeeded_nonexistent",
        mark_succeeded_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "create_run_duplicate_id",
        create_run_duplicate_id(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "insert_result_duplicate",
        insert_result_duplicate(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "ping_succeeds",
        ping_succeeds(factory).await,
    ));

    results
}

// ── 1. get_input_version on an unknown id carries that id ────────────────────

async fn get_input_version_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = fresh_id("iv-missing");
    match s.get_input_version(&id).await {
        Err(StorageError::InputVersionNotFound { id: got }) if got == id => Ok(()),
        other => Err(format!("expected InputVersionNotFound({id}), got {:?}", other)),
    }
}

// ── 2. get_run on an unknown id ──────────────────────────────────────────────

async fn get_run_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = fresh_id("run-missing");
    match s.get_run(&id).await {
        Err(StorageError::RunNotFound { id: got }) if got == id => Ok(()),
        other => Err(format!("expected RunNotFound({id}), got {:?}", other)),
    }
}

// ── 3. get_result on an unknown run ──────────────────────────────────────────

async fn get_result_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = fresh_id("run-missing");
    match s.get_result(&id).await {
        Err(StorageError::ResultNotFound { calc_run_id }) if calc_run_id == id => Ok(()),
        other => Err(format!("expected ResultNotFound({id}), got {:?}", other)),
    }
}

// ── 4. mark_succeeded on an unknown run ──────────────────────────────────────

async fn mark_succeeded_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = fresh_id("run-missing");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.mark_succeeded(&mut snap, &id).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::RunNotFound { .. }) => Ok(()),
        other => Err(format!("expected RunNotFound, got {:?}", other)),
    }
}

// ── 5. create_run with an id that is already committed ───────────────────────

async fn create_run_duplicate_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let run_id = fresh_id("run");
    super::seed_running_run(&s, &run_id, &fresh_id("iv")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.create_run(&mut snap, &run_id, "iv-other", "hash").await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::RunExists { id }) if id == run_id => Ok(()),
        other => Err(format!("expected RunExists, got {:?}", other)),
    }
}

// ── 6. second result for the same run ────────────────────────────────────────

async fn insert_result_duplicate<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.insert_result(&mut snap, make_result(&run_id))
        .await
        .map_err(|e| format!("first insert_result: {e}"))?;
    let second = s.insert_result(&mut snap, make_result(&run_id)).await;
    let _ = s.abort_snapshot(snap).await;
    match second {
        Err(e @ StorageError::ResultExists { .. }) if e.is_constraint() => Ok(()),
        other => Err(format!("expected ResultExists, got {:?}", other)),
    }
}

// ── 7. health round trip ─────────────────────────────────────────────────────

async fn ping_succeeds<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.ping().await.map_err(|e| format!("ping: {e}"))
}
