//! # LedgerSync Connector
//!
//! Thin clients for the two external accounting systems and the credential
//! resolution seam the reconciliation engine consumes.
//!
//! - [`traits`] - `SourceClient` / `TargetClient` capability traits
//! - [`types`] - fixed per-entity record types (no generic ETL surface)
//! - [`credentials`] - read-only credential resolution per
//!   `(tenant, provider, environment)`
//! - [`source_rest`] / [`target_rest`] - REST implementations with
//!   pagination and cached, transparently renewed session auth
//! - [`factory`] - per-run client construction
//! - [`error`] - error taxonomy with transient/permanent classification
//!   and sanitized user-facing messages

pub mod credentials;
pub mod error;
pub mod factory;
pub mod source_rest;
pub mod target_rest;
pub mod traits;
pub mod types;

pub use credentials::{Credential, CredentialResolver, PgCredentialResolver, Provider};
pub use error::{ConnectorError, ConnectorResult};
pub use factory::{ClientFactory, RestClientFactory};
pub use traits::{SourceClient, TargetClient};
