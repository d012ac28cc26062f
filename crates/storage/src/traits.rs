use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{CalcResultRecord, CalcRunRecord, InputVersionRecord, RunFailure};

/// The storage trait for calc-run persistence backends.
///
/// A `CalcStorage` implementation is the Input Version Store and the Run
/// Ledger in one durable, transactional store. It holds no business logic:
/// the orchestrator decides when each record is written.
///
/// ## Snapshot Semantics
///
/// The primary write path takes `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()` -- start a transaction, returns a `Snapshot`
/// 2. Call the snapshot-scoped methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` -- commit and consume the transaction
///    OR `abort_snapshot(snapshot)` -- roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back.
///
/// ## Compensation
///
/// `mark_failed` is deliberately NOT snapshot-scoped. It runs after the
/// primary snapshot has been rolled back and commits on its own.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait CalcStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    ///
    /// Must be `Send` to allow passing across async task boundaries.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Input Version Store (within snapshot) ─────────────────────────────────

    /// Store an immutable input snapshot.
    ///
    /// Returns `Err(StorageError::InputVersionExists)` if the id is taken.
    /// There is no update or delete counterpart.
    async fn put_input_version(
        &self,
        snapshot: &mut Self::Snapshot,
        record: InputVersionRecord,
    ) -> Result<(), StorageError>;

    // ── Run Ledger (within snapshot) ──────────────────────────────────────────

    /// Insert a run in status RUNNING, stamped with the current time.
    ///
    /// Returns the inserted row, or `Err(StorageError::RunExists)`.
    async fn create_run(
        &self,
        snapshot: &mut Self::Snapshot,
        id: &str,
        input_version_id: &str,
        inputs_hash: &str,
    ) -> Result<CalcRunRecord, StorageError>;

    /// Store the engine result for a run.
    ///
    /// Must be written in the SAME snapshot as `mark_succeeded` so a result
    /// exists if and only if its run SUCCEEDED.
    async fn insert_result(
        &self,
        snapshot: &mut Self::Snapshot,
        record: CalcResultRecord,
    ) -> Result<(), StorageError>;

    /// Transition RUNNING -> SUCCEEDED and set `finished_at`.
    ///
    /// Returns `Err(StorageError::RunNotFound)` if the run does not exist and
    /// `Err(StorageError::InvalidTransition)` if it is already terminal.
    async fn mark_succeeded(
        &self,
        snapshot: &mut Self::Snapshot,
        id: &str,
    ) -> Result<(), StorageError>;

    // ── Run Ledger (independent) ──────────────────────────────────────────────

    /// Record a run as FAILED, committed independently of any snapshot.
    ///
    /// An existing RUNNING row is transitioned in place. When no row exists
    /// (the snapshot that created it was rolled back) a terminal FAILED row
    /// is inserted from `failure`. A row that is already terminal yields
    /// `Err(StorageError::InvalidTransition)`.
    async fn mark_failed(&self, failure: &RunFailure) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    /// Returns `Err(StorageError::InputVersionNotFound)` if absent.
    async fn get_input_version(&self, id: &str) -> Result<InputVersionRecord, StorageError>;

    /// Returns `Err(StorageError::RunNotFound)` if absent.
    async fn get_run(&self, id: &str) -> Result<CalcRunRecord, StorageError>;

    /// Returns `Err(StorageError::ResultNotFound)` if absent.
    async fn get_result(&self, calc_run_id: &str) -> Result<CalcResultRecord, StorageError>;

    /// Cheap round trip used by health checks.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Release pooled resources at shutdown.
    async fn close(&self) {}
}
