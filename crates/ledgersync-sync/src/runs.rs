//! Run tracking.
//!
//! One row per (tenant, entity, environment, invocation). The latest
//! `Success` row's `last_sync_at` is the incremental-window lower bound
//! for the next run of the same combination. Starting a run doubles as a
//! lease: the insert of the `running` row is guarded by a partial unique
//! index, so a second overlapping start is refused instead of queued.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgersync_core::{Environment, TenantId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::types::{EntityKind, RunCounts, RunStatus};

/// One reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub entity: EntityKind,
    pub environment: Environment,
    pub status: RunStatus,
    pub records_processed: i32,
    pub records_failed: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Incremental-window boundary; set only when the run succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Persistent access to sync runs.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Atomically claim the run lease and create the `running` row.
    ///
    /// Returns `None` when another run of the same
    /// `(tenant, entity, environment)` is already running; callers treat
    /// that as "skip", never as "queue".
    async fn claim(
        &self,
        tenant_id: TenantId,
        entity: EntityKind,
        environment: Environment,
        started_at: DateTime<Utc>,
    ) -> SyncResult<Option<SyncRun>>;

    /// Transition a run to `Success`, recording counts and the window
    /// boundary for the next run.
    async fn complete(
        &self,
        run_id: Uuid,
        counts: RunCounts,
        last_sync_at: DateTime<Utc>,
    ) -> SyncResult<SyncRun>;

    /// Transition a run to `Failed`, capturing the error message.
    async fn fail(
        &self,
        run_id: Uuid,
        error_message: &str,
        counts: RunCounts,
    ) -> SyncResult<SyncRun>;

    /// The `last_sync_at` of the most recent successful run.
    async fn last_success_sync_at(
        &self,
        tenant_id: TenantId,
        entity: EntityKind,
        environment: Environment,
    ) -> SyncResult<Option<DateTime<Utc>>>;

    /// Most recent runs for a tenant, newest first.
    async fn latest_runs(&self, tenant_id: TenantId, limit: i64) -> SyncResult<Vec<SyncRun>>;

    /// Currently running runs for a tenant, newest first.
    async fn running_runs(&self, tenant_id: TenantId) -> SyncResult<Vec<SyncRun>>;
}

/// Postgres-backed run repository.
pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    /// Create a repository over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SyncRunRow {
    id: Uuid,
    tenant_id: TenantId,
    entity: EntityKind,
    environment: Environment,
    status: RunStatus,
    records_processed: i32,
    records_failed: i32,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    last_sync_at: Option<DateTime<Utc>>,
}

impl SyncRunRow {
    fn into_run(self) -> SyncRun {
        SyncRun {
            id: self.id,
            tenant_id: self.tenant_id,
            entity: self.entity,
            environment: self.environment,
            status: self.status,
            records_processed: self.records_processed,
            records_failed: self.records_failed,
            error_message: self.error_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
            last_sync_at: self.last_sync_at,
        }
    }
}

const RUN_COLUMNS: &str = r"
    id, tenant_id, entity, environment, status,
    records_processed, records_failed, error_message,
    started_at, completed_at, last_sync_at
";

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn claim(
        &self,
        tenant_id: TenantId,
        entity: EntityKind,
        environment: Environment,
        started_at: DateTime<Utc>,
    ) -> SyncResult<Option<SyncRun>> {
        // The partial unique index sync_runs_one_running makes this insert
        // the lease acquisition; a conflict means the lease is held.
        let sql = format!(
            r"
            INSERT INTO sync_runs
                (id, tenant_id, entity, environment, status, started_at)
            VALUES ($1, $2, $3, $4, 'running', $5)
            ON CONFLICT (tenant_id, entity, environment) WHERE status = 'running'
            DO NOTHING
            RETURNING {RUN_COLUMNS}
            "
        );

        let row: Option<SyncRunRow> = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(entity)
            .bind(environment)
            .bind(started_at)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(SyncRunRow::into_run))
    }

    async fn complete(
        &self,
        run_id: Uuid,
        counts: RunCounts,
        last_sync_at: DateTime<Utc>,
    ) -> SyncResult<SyncRun> {
        let sql = format!(
            r"
            UPDATE sync_runs
            SET status = 'success',
                records_processed = $2,
                records_failed = $3,
                completed_at = NOW(),
                last_sync_at = $4
            WHERE id = $1
            RETURNING {RUN_COLUMNS}
            "
        );

        let row: Option<SyncRunRow> = sqlx::query_as(&sql)
            .bind(run_id)
            .bind(counts.processed)
            .bind(counts.failed)
            .bind(last_sync_at)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncRunRow::into_run)
            .ok_or(SyncError::RunNotFound { run_id })
    }

    async fn fail(
        &self,
        run_id: Uuid,
        error_message: &str,
        counts: RunCounts,
    ) -> SyncResult<SyncRun> {
        let sql = format!(
            r"
            UPDATE sync_runs
            SET status = 'failed',
                records_processed = $2,
                records_failed = $3,
                error_message = $4,
                completed_at = NOW()
            WHERE id = $1
            RETURNING {RUN_COLUMNS}
            "
        );

        let row: Option<SyncRunRow> = sqlx::query_as(&sql)
            .bind(run_id)
            .bind(counts.processed)
            .bind(counts.failed)
            .bind(error_message)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncRunRow::into_run)
            .ok_or(SyncError::RunNotFound { run_id })
    }

    async fn last_success_sync_at(
        &self,
        tenant_id: TenantId,
        entity: EntityKind,
        environment: Environment,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        let row: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
            r"
            SELECT last_sync_at
            FROM sync_runs
            WHERE tenant_id = $1 AND entity = $2 AND environment = $3
              AND status = 'success'
            ORDER BY last_sync_at DESC NULLS LAST
            LIMIT 1
            ",
        )
        .bind(tenant_id)
        .bind(entity)
        .bind(environment)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(ts,)| ts))
    }

    async fn latest_runs(&self, tenant_id: TenantId, limit: i64) -> SyncResult<Vec<SyncRun>> {
        let sql = format!(
            r"
            SELECT {RUN_COLUMNS}
            FROM sync_runs
            WHERE tenant_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "
        );

        let rows: Vec<SyncRunRow> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(SyncRunRow::into_run).collect())
    }

    async fn running_runs(&self, tenant_id: TenantId) -> SyncResult<Vec<SyncRun>> {
        let sql = format!(
            r"
            SELECT {RUN_COLUMNS}
            FROM sync_runs
            WHERE tenant_id = $1 AND status = 'running'
            ORDER BY started_at DESC
            "
        );

        let rows: Vec<SyncRunRow> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(SyncRunRow::into_run).collect())
    }
}
