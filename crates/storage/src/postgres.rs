//! PostgreSQL `CalcStorage` backend.
//!
//! Wraps a `PgPool`. A snapshot is a `sqlx::Transaction`, so dropping one
//! without committing rolls it back. All SQL is runtime-checked
//! (`sqlx::query`, not `sqlx::query!`) to avoid a compile-time DB requirement.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{
    format_rfc3339, CalcResultRecord, CalcRunRecord, InputVersionRecord, RunFailure, RunStatus,
};
use crate::traits::CalcStorage;

/// Schema for the three record sets. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bersn_input_versions (
    id              TEXT PRIMARY KEY,
    project_id      TEXT NOT NULL,
    branch_type     TEXT NOT NULL,
    formula_version TEXT NOT NULL,
    payload_json    JSONB NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS calc_runs (
    id               TEXT PRIMARY KEY,
    input_version_id TEXT NOT NULL,
    inputs_hash      TEXT NOT NULL,
    status           TEXT NOT NULL CHECK (status IN ('RUNNING', 'SUCCEEDED', 'FAILED')),
    started_at       TIMESTAMPTZ NOT NULL,
    finished_at      TIMESTAMPTZ,
    error_message    TEXT
);

CREATE INDEX IF NOT EXISTS calc_runs_inputs_hash_idx ON calc_runs (inputs_hash);

CREATE TABLE IF NOT EXISTS calc_results (
    calc_run_id TEXT PRIMARY KEY REFERENCES calc_runs (id),
    result_json JSONB NOT NULL
);
"#;

/// Connection parameters for the PostgreSQL store.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

/// Postgres-backed calc storage.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

type RunRow = (
    String,
    String,
    String,
    String,
    OffsetDateTime,
    Option<OffsetDateTime>,
    Option<String>,
);

const SELECT_RUN: &str = "SELECT id, input_version_id, inputs_hash, status, started_at, \
     finished_at, error_message FROM calc_runs WHERE id = $1";

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool with the given parameters.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(backend)?;
        Ok(Self::new(pool))
    }

    /// Open a pool from a `postgres://` URL.
    pub async fn connect_url(url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(backend)?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

fn parse_status(raw: &str) -> Result<RunStatus, StorageError> {
    raw.parse().map_err(StorageError::Backend)
}

fn run_from_row(row: RunRow) -> Result<CalcRunRecord, StorageError> {
    let (id, input_version_id, inputs_hash, status, started_at, finished_at, error_message) = row;
    Ok(CalcRunRecord {
        id,
        input_version_id,
        inputs_hash,
        status: parse_status(&status)?,
        started_at: format_rfc3339(started_at),
        finished_at: finished_at.map(format_rfc3339),
        error_message,
    })
}

/// Explain why an UPDATE guarded by `status = 'RUNNING'` touched no rows.
async fn transition_failure<'e, E>(
    executor: E,
    id: &str,
    to: RunStatus,
) -> StorageError
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let status: Result<Option<String>, sqlx::Error> =
        sqlx::query_scalar("SELECT status FROM calc_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await;
    match status {
        Ok(None) => StorageError::RunNotFound { id: id.to_string() },
        Ok(Some(raw)) => match parse_status(&raw) {
            Ok(from) => StorageError::InvalidTransition {
                calc_run_id: id.to_string(),
                from,
                to,
            },
            Err(e) => e,
        },
        Err(e) => backend(e),
    }
}

#[async_trait]
impl CalcStorage for PostgresStorage {
    type Snapshot = Transaction<'static, Postgres>;

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError> {
        self.pool.begin().await.map_err(backend)
    }

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError> {
        snapshot.commit().await.map_err(backend)
    }

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError> {
        snapshot.rollback().await.map_err(backend)
    }

    async fn put_input_version(
        &self,
        snapshot: &mut Self::Snapshot,
        record: InputVersionRecord,
    ) -> Result<(), StorageError> {
        let created_at = OffsetDateTime::parse(&record.created_at, &Rfc3339)
            .map_err(|e| StorageError::Backend(format!("invalid created_at: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO bersn_input_versions
                (id, project_id, branch_type, formula_version, payload_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.id)
        .bind(&record.project_id)
        .bind(&record.branch_type)
        .bind(&record.formula_version)
        .bind(&record.payload)
        .bind(created_at)
        .execute(&mut **snapshot)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::InputVersionExists {
                    id: record.id.clone(),
                }
            } else {
                backend(e)
            }
        })?;
        Ok(())
    }

    async fn create_run(
        &self,
        snapshot: &mut Self::Snapshot,
        id: &str,
        input_version_id: &str,
        inputs_hash: &str,
    ) -> Result<CalcRunRecord, StorageError> {
        let started_at: OffsetDateTime = sqlx::query_scalar(
            r#"
            INSERT INTO calc_runs (id, input_version_id, inputs_hash, status, started_at)
            VALUES ($1, $2, $3, 'RUNNING', now())
            RETURNING started_at
            "#,
        )
        .bind(id)
        .bind(input_version_id)
        .bind(inputs_hash)
        .fetch_one(&mut **snapshot)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::RunExists { id: id.to_string() }
            } else {
                backend(e)
            }
        })?;

        Ok(CalcRunRecord {
            id: id.to_string(),
            input_version_id: input_version_id.to_string(),
            inputs_hash: inputs_hash.to_string(),
            status: RunStatus::Running,
            started_at: format_rfc3339(started_at),
            finished_at: None,
            error_message: None,
        })
    }

    async fn insert_result(
        &self,
        snapshot: &mut Self::Snapshot,
        record: CalcResultRecord,
    ) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO calc_results (calc_run_id, result_json) VALUES ($1, $2)")
            .bind(&record.calc_run_id)
            .bind(&record.result)
            .execute(&mut **snapshot)
            .await
            .map_err(|e| {
                let fk_violation = e
                    .as_database_error()
                    .map(|db| db.is_foreign_key_violation())
                    .unwrap_or(false);
                if is_unique_violation(&e) {
                    StorageError::ResultExists {
                        calc_run_id: record.calc_run_id.clone(),
                    }
                } else if fk_violation {
                    StorageError::RunNotFound {
                        id: record.calc_run_id.clone(),
                    }
                } else {
                    backend(e)
                }
            })?;
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        snapshot: &mut Self::Snapshot,
        id: &str,
    ) -> Result<(), StorageError> {
        let updated = sqlx::query(
            r#"
            UPDATE calc_runs SET status = 'SUCCEEDED', finished_at = now()
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id)
        .execute(&mut **snapshot)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            return Err(transition_failure(&mut **snapshot, id, RunStatus::Succeeded).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, failure: &RunFailure) -> Result<(), StorageError> {
        let started_at = OffsetDateTime::parse(&failure.started_at, &Rfc3339)
            .map_err(|e| StorageError::Backend(format!("invalid started_at: {e}")))?;
        let updated = sqlx::query(
            r#"
            INSERT INTO calc_runs
                (id, input_version_id, inputs_hash, status, started_at, finished_at, error_message)
            VALUES ($1, $2, $3, 'FAILED', $4, now(), $5)
            ON CONFLICT (id) DO UPDATE
                SET status = 'FAILED', finished_at = now(), error_message = EXCLUDED.error_message
                WHERE calc_runs.status = 'RUNNING'
            "#,
        )
        .bind(&failure.calc_run_id)
        .bind(&failure.input_version_id)
        .bind(&failure.inputs_hash)
        .bind(started_at)
        .bind(&failure.error_message)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            return Err(
                transition_failure(&self.pool, &failure.calc_run_id, RunStatus::Failed).await,
            );
        }
        Ok(())
    }

    async fn get_input_version(&self, id: &str) -> Result<InputVersionRecord, StorageError> {
        let row: Option<(String, String, String, String, serde_json::Value, OffsetDateTime)> =
            sqlx::query_as(
                r#"
                SELECT id, project_id, branch_type, formula_version, payload_json, created_at
                FROM bersn_input_versions WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let (id, project_id, branch_type, formula_version, payload, created_at) =
            row.ok_or_else(|| StorageError::InputVersionNotFound { id: id.to_string() })?;
        Ok(InputVersionRecord {
            id,
            project_id,
            branch_type,
            formula_version,
            payload,
            created_at: format_rfc3339(created_at),
        })
    }

    async fn get_run(&self, id: &str) -> Result<CalcRunRecord, StorageError> {
        let row: Option<RunRow> = sqlx::query_as(SELECT_RUN)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        run_from_row(row.ok_or_else(|| StorageError::RunNotFound { id: id.to_string() })?)
    }

    async fn get_result(&self, calc_run_id: &str) -> Result<CalcResultRecord, StorageError> {
        let result: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT result_json FROM calc_results WHERE calc_run_id = $1")
                .bind(calc_run_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        result
            .map(|result| CalcResultRecord {
                calc_run_id: calc_run_id.to_string(),
                result,
            })
            .ok_or_else(|| StorageError::ResultNotFound {
                calc_run_id: calc_run_id.to_string(),
            })
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
