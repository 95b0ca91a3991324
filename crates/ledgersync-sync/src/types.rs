//! Common types for reconciliation runs.

use serde::{Deserialize, Serialize};

/// The entity kinds the engine can reconcile.
///
/// Dispatch over the kind selects one of the four reconcilers; all four
/// share the run lifecycle in [`crate::engine::SyncEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Customer,
    Product,
    Invoice,
    Payment,
}

impl EntityKind {
    /// Whether this kind is fetched over an incremental time window.
    ///
    /// Customers and products are small enough to re-scan fully; invoices
    /// and payments are append-mostly and fetched from the last successful
    /// sync onwards.
    #[must_use]
    pub fn is_windowed(&self) -> bool {
        matches!(self, EntityKind::Invoice | EntityKind::Payment)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Customer => write!(f, "customer"),
            EntityKind::Product => write!(f, "product"),
            EntityKind::Invoice => write!(f, "invoice"),
            EntityKind::Payment => write!(f, "payment"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "customer" => Ok(EntityKind::Customer),
            "product" => Ok(EntityKind::Product),
            "invoice" => Ok(EntityKind::Invoice),
            "payment" => Ok(EntityKind::Payment),
            _ => Err(format!("Unknown entity kind: {s}")),
        }
    }
}

/// Status of a reconciliation run.
///
/// `Failed` is reserved for setup or transport errors raised outside the
/// per-record loop; a run whose records partially failed still completes
/// as `Success` with a non-zero failed count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    /// Whether the run has reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Unknown run status: {s}")),
        }
    }
}

/// Per-run record counters returned to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Records handled without error (including idempotent no-ops).
    pub processed: i32,
    /// Records that failed and were skipped; the run itself continues.
    pub failed: i32,
}

impl RunCounts {
    /// Count one successful record.
    pub fn record_ok(&mut self) {
        self.processed += 1;
    }

    /// Count one failed record.
    pub fn record_failed(&mut self) {
        self.failed += 1;
    }
}
