//! LedgerSync Core Library
//!
//! Shared types for LedgerSync.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (`TenantId`)
//! - [`environment`] - Target environment scoping (sandbox/production)
//!
//! Every persisted row and every API call in LedgerSync is scoped by a
//! `(TenantId, Environment)` pair; keeping both strongly typed makes that
//! scoping compile-checked across crates.

pub mod environment;
pub mod ids;

pub use environment::{Environment, ParseEnvironmentError};
pub use ids::{ParseIdError, TenantId};
