//! Error types for the reconciliation engine.

use ledgersync_connector::{ConnectorError, Provider};
use ledgersync_core::Environment;
use thiserror::Error;
use uuid::Uuid;

use crate::types::EntityKind;

/// Errors raised by the reconciliation engine and its stores.
///
/// Variants raised outside the per-record loop abort the run as `Failed`;
/// variants raised for one record are counted and logged, never propagated.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Error from a Source or Target client.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No credential is stored for this provider and environment.
    #[error("no {provider} credentials configured for the {environment} environment")]
    CredentialsMissing {
        provider: Provider,
        environment: Environment,
    },

    /// The stored credential is disabled.
    #[error("{provider} credentials for the {environment} environment are disabled")]
    CredentialsDisabled {
        provider: Provider,
        environment: Environment,
    },

    /// Another run for the same (tenant, entity, environment) holds the lease.
    #[error("{entity} sync already running for the {environment} environment")]
    AlreadyRunning {
        entity: EntityKind,
        environment: Environment,
    },

    /// A run row disappeared mid-transition.
    #[error("sync run not found: {run_id}")]
    RunNotFound { run_id: Uuid },

    /// The invoiced customer has no Target mapping yet; customers must
    /// sync before invoices.
    #[error("customer {customer_number} has no target mapping")]
    UnmappedCustomer { customer_number: String },

    /// Every line of the invoice references an unmapped product, so the
    /// invoice cannot be represented in the Target system.
    #[error("invoice {invoice_id} has no lines with a mapped product")]
    NoMappedLines { invoice_id: i64 },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;
