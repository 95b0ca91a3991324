//! # LedgerSync Reconciliation Engine
//!
//! Decides, for every source record, whether it is new, unchanged or
//! modified, correlates it with a previously created Target record
//! without creating duplicates, and does so incrementally and
//! idempotently across repeated runs that may partially fail.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌─────────────┐     ┌───────────────────┐
//! │ Scheduler  │────►│ SyncEngine  │────►│ Entity reconciler │
//! │ (or manual)│     │ (run lease, │     │ (one per kind)    │
//! └────────────┘     │  contract)  │     └───────┬───────────┘
//!                    └──────┬──────┘             │
//!                           │            ┌───────┴────────┐
//!                    ┌──────▼──────┐     ▼                ▼
//!                    │ Run tracker │  Change          Identity
//!                    │             │  detector        mapping store
//!                    └─────────────┘  (hashing)       (links)
//! ```
//!
//! Per-record failures are counted and logged, never raised; a run fails
//! outright only for setup or transport errors outside the per-record
//! loop. Retry is idempotent re-execution, not explicit retry logic: the
//! next run naturally picks up whatever is not yet linked or flagged.

pub mod engine;
pub mod error;
pub mod hash;
pub mod migrations;
pub mod runs;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod types;

pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use migrations::run_migrations;
pub use runs::{PgRunRepository, RunRepository, SyncRun};
pub use schedule::{parse_interval, PgScheduleRepository, Schedule, ScheduleRepository};
pub use scheduler::{SchedulerConfig, SchedulerWorker};
pub use store::{EntityLink, InvoiceLink, LinkRepository, PgLinkRepository};
pub use types::{EntityKind, RunCounts, RunStatus};
