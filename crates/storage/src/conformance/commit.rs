use std::future::Future;

use super::{fresh_id, make_input_version, make_result, TestResult};
use crate::{CalcStorage, RunStatus, StorageError};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // Full success path
    results.push(TestResult::from_result(
        "commit",
        "success_path_all_visible_after_commit",
        success_path_all_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "success_path_none_visible_after_abort",
        success_path_none_visible_after_abort(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "result_preserved_exactly",
        result_preserved_exactly(factory).await,
    ));

    // Succeeded status and result travel together
    results.push(TestResult::from_result(
        "commit",
        "succeeded_status_invisible_before_commit",
        succeeded_status_invisible_before_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "succeed_previously_committed_run",
        succeed_previously_committed_run(factory).await,
    ));

    results
}

async fn success_path_all_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.insert_result(&mut snap, make_result(&run_id))
        .await
        .map_err(|e| format!("insert_result: {e}"))?;
    s.mark_succeeded(&mut snap, &run_id)
        .await
        .map_err(|e| format!("mark_succeeded: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let run = s.get_run(&run_id).await.map_err(|e| format!("get_run: {e}"))?;
    if run.status != RunStatus::Succeeded {
        return Err(format!("expected SUCCEEDED, got {}", run.status));
    }
    if run.finished_at.is_none() {
        return Err("finished_at missing on SUCCEEDED run".to_string());
    }
    if run.error_message.is_some() {
        return Err("error_message set on SUCCEEDED run".to_string());
    }
    s.get_result(&run_id)
        .await
        .map_err(|e| format!("get_result: {e}"))?;
    s.get_input_version(&run.input_version_id)
        .await
        .map_err(|e| format!("get_input_version: {e}"))?;
    Ok(())
}

async fn success_path_none_visible_after_abort<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.insert_result(&mut snap, make_result(&run_id))
        .await
        .map_err(|e| format!("insert_result: {e}"))?;
    s.mark_succeeded(&mut snap, &run_id)
        .await
        .map_err(|e| format!("mark_succeeded: {e}"))?;
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    if !matches!(
        s.get_result(&run_id).await,
        Err(StorageError::ResultNotFound { .. })
    ) {
        return Err("result visible after abort".to_string());
    }
    if !matches!(s.get_run(&run_id).await, Err(StorageError::RunNotFound { .. })) {
        return Err("run visible after abort".to_string());
    }
    if !matches!(
        s.get_input_version(&iv_id).await,
        Err(StorageError::InputVersionNotFound { .. })
    ) {
        return Err("input version visible after abort".to_string());
    }
    Ok(())
}

async fn result_preserved_exactly<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    let run_id = fresh_id("run");
    let expected = make_result(&run_id);

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.create_run(&mut snap, &run_id, &iv_id, "hash")
        .await
        .map_err(|e| format!("create_run: {e}"))?;
    s.insert_result(&mut snap, expected.clone())
        .await
        .map_err(|e| format!("insert_result: {e}"))?;
    s.mark_succeeded(&mut snap, &run_id)
        .await
        .map_err(|e| format!("mark_succeeded: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let stored = s
        .get_result(&run_id)
        .await
        .map_err(|e| format!("get_result: {e}"))?;
    if stored != expected {
        return Err(format!("result changed: {:?} vs {:?}", stored, expected));
    }
    Ok(())
}

async fn succeeded_status_invisible_before_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    let run_id = fresh_id("run");
    super::seed_running_run(&s, &run_id, &iv_id).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_result(&mut snap, make_result(&run_id))
        .await
        .map_err(|e| format!("insert_result: {e}"))?;
    s.mark_succeeded(&mut snap, &run_id)
        .await
        .map_err(|e| format!("mark_succeeded: {e}"))?;

    let run = s.get_run(&run_id).await;
    let result = s.get_result(&run_id).await;
    let _ = s.abort_snapshot(snap).await;

    match run {
        Ok(r) if r.status == RunStatus::Running => {}
        other => return Err(format!("expected committed RUNNING row, got {:?}", other)),
    }
    if result.is_ok() {
        return Err("uncommitted result visible outside snapshot".to_string());
    }
    Ok(())
}

async fn succeed_previously_committed_run<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let iv_id = fresh_id("iv");
    let run_id = fresh_id("run");
    super::seed_running_run(&s, &run_id, &iv_id).await?;

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

    let run = s.get_run(&run_id).await.map_err(|e| format!("get_run: {e}"))?;
    if run.status != RunStatus::Succeeded {
        return Err(format!("expected SUCCEEDED, got {}", run.status));
    }
    Ok(())
}
