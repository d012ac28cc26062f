use std::future::Future;
use std::sync::Arc;

use super::{fresh_id, make_failure, make_input_version, make_result, TestResult};
use crate::{CalcStorage, RunStatus, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "independent_submissions_all_commit",
        independent_submissions_all_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_mark_failed_exactly_one_wins",
        concurrent_mark_failed_exactly_one_wins(factory).await,
    ));

    results
}

// ── Independent submissions never contend ───────────────────────────────────

/// N tasks each run the full success path with fresh ids. Every one of them
/// must commit, and every run must end SUCCEEDED with its result.
async fn independent_submissions_all_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        let iv_id = fresh_id("iv");
        let run_id = fresh_id("run");
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.put_input_version(&mut snap, make_input_version(&iv_id))
                .await?;
            s.create_run(&mut snap, &run_id, &iv_id, "hash").await?;
            s.insert_result(&mut snap, make_result(&run_id)).await?;
            s.mark_succeeded(&mut snap, &run_id).await?;
            s.commit_snapshot(snap).await?;
            Ok::<String, StorageError>(run_id)
        }));
    }

    let mut run_ids = Vec::new();
    for handle in handles {
        let run_id = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        run_ids.push(run_id);
    }

    for run_id in &run_ids {
        let run = storage
            .get_run(run_id)
            .await
            .map_err(|e| format!("get_run {run_id}: {e}"))?;
        if run.status != RunStatus::Succeeded {
            return Err(format!("run {run_id} ended {}", run.status));
        }
        storage
            .get_result(run_id)
            .await
            .map_err(|e| format!("get_result {run_id}: {e}"))?;
    }
    Ok(())
}

// ── Racing compensations: one terminal transition ───────────────────────────

/// N tasks race to mark the same rolled-back run FAILED. Exactly one write
/// lands; the rest must see InvalidTransition.
async fn concurrent_mark_failed_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CalcStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let run_id = fresh_id("run");
    let iv_id = fresh_id("iv");

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let failure = make_failure(&run_id, &iv_id, &format!("failure-{i}"));
        handles.push(tokio::spawn(async move {
            match s.mark_failed(&failure).await {
                Ok(()) => Ok(true),
                Err(StorageError::InvalidTransition { .. }) => Ok(false),
                // Two inserts racing on the same primary key.
                Err(StorageError::RunExists { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    let run = storage
        .get_run(&run_id)
        .await
        .map_err(|e| format!("get_run: {e}"))?;
    if run.status != RunStatus::Failed {
        return Err(format!("expected FAILED, got {}", run.status));
    }
    Ok(())
}
