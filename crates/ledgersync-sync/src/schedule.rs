//! Sync schedules and interval approximation.
//!
//! A schedule says how often one `(tenant, entity, environment)` should be
//! reconciled. The interval specification is approximated, not evaluated:
//! only a handful of shapes are recognized and everything else falls back
//! to hourly. This is a documented limitation, not a cron evaluator.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ledgersync_core::{Environment, TenantId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SyncResult;
use crate::types::EntityKind;

/// A per-tenant sync schedule.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Schedule {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub entity: EntityKind,
    pub environment: Environment,
    /// Interval specification, approximated by [`parse_interval`].
    pub interval_spec: String,
    pub enabled: bool,
    /// Last time the scheduler dispatched this schedule.
    pub last_scheduled_at: Option<DateTime<Utc>>,
    /// Last time a dispatched run completed successfully.
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Whether this schedule is due at `now`.
    ///
    /// A schedule that has never been dispatched is immediately due.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_scheduled_at {
            None => true,
            Some(last) => now - last >= parse_interval(&self.interval_spec),
        }
    }
}

/// Approximate an interval specification.
///
/// Recognized shapes:
/// - `every N minutes` / `every N hours` (plain language)
/// - `*/N * * * *` (every N minutes)
/// - `0 */N * * *` (every N hours)
/// - `0 * * * *`, `hourly`, `top of every hour`
///
/// Anything else defaults to hourly. Full cron semantics are deliberately
/// out of scope; a real evaluator could replace this function without
/// changing the dispatch contract.
#[must_use]
pub fn parse_interval(spec: &str) -> Duration {
    let spec = spec.trim().to_lowercase();

    if let Some(n) = parse_plain(&spec, "minute") {
        return Duration::minutes(n);
    }
    if let Some(n) = parse_plain(&spec, "hour") {
        return Duration::hours(n);
    }

    if spec == "hourly" || spec == "top of every hour" || spec == "0 * * * *" {
        return Duration::hours(1);
    }

    let fields: Vec<&str> = spec.split_whitespace().collect();
    if fields.len() == 5 {
        if let Some(n) = step_value(fields[0]) {
            if fields[1] == "*" {
                return Duration::minutes(n);
            }
        }
        if fields[0] == "0" {
            if let Some(n) = step_value(fields[1]) {
                return Duration::hours(n);
            }
        }
    }

    Duration::hours(1)
}

/// Parse "every N minutes"-style specs; `unit` is the singular unit name.
fn parse_plain(spec: &str, unit: &str) -> Option<i64> {
    let rest = spec.strip_prefix("every ")?;
    let (count, unit_part) = rest.split_once(' ')?;
    if unit_part == unit || unit_part == format!("{unit}s") {
        count.parse().ok().filter(|n| *n > 0)
    } else {
        None
    }
}

/// Parse a `*/N` cron field.
fn step_value(field: &str) -> Option<i64> {
    field
        .strip_prefix("*/")
        .and_then(|n| n.parse().ok())
        .filter(|n| *n > 0)
}

/// Persistent access to schedules.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// All enabled schedules across all tenants.
    async fn list_enabled(&self) -> SyncResult<Vec<Schedule>>;

    /// Record that the scheduler dispatched this schedule.
    async fn mark_scheduled(&self, id: Uuid, at: DateTime<Utc>) -> SyncResult<()>;

    /// Record that a dispatched run completed successfully.
    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> SyncResult<()>;
}

/// Postgres-backed schedule repository.
pub struct PgScheduleRepository {
    pool: PgPool,
}

impl PgScheduleRepository {
    /// Create a repository over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepository for PgScheduleRepository {
    async fn list_enabled(&self) -> SyncResult<Vec<Schedule>> {
        let schedules = sqlx::query_as(
            r"
            SELECT id, tenant_id, entity, environment, interval_spec, enabled,
                   last_scheduled_at, last_completed_at
            FROM sync_schedules
            WHERE enabled = TRUE
            ORDER BY tenant_id, entity
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(schedules)
    }

    async fn mark_scheduled(&self, id: Uuid, at: DateTime<Utc>) -> SyncResult<()> {
        sqlx::query("UPDATE sync_schedules SET last_scheduled_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> SyncResult<()> {
        sqlx::query("UPDATE sync_schedules SET last_completed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
