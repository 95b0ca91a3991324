//! Credential resolution.
//!
//! The engine consumes stored API credentials read-only: one credential per
//! `(tenant, provider, environment)`. Storage and management of credentials
//! live elsewhere; a missing or disabled credential is a fatal,
//! run-aborting condition for the caller.

use async_trait::async_trait;
use ledgersync_core::{Environment, TenantId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{ConnectorError, ConnectorResult};

/// Which of the two external systems a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// The read-only upstream accounting system.
    Source,
    /// The writable downstream accounting system.
    Target,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Source => write!(f, "source"),
            Provider::Target => write!(f, "target"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "source" => Ok(Provider::Source),
            "target" => Ok(Provider::Target),
            _ => Err(format!("Unknown provider: {s}")),
        }
    }
}

/// A resolved API credential.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Base URL of the remote API.
    pub base_url: String,
    /// Opaque secret used to authenticate (token or session key).
    pub secret: String,
    /// Whether the tenant has this credential enabled.
    pub enabled: bool,
}

/// Read-only access to stored credentials.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve the credential for one `(tenant, provider, environment)`.
    ///
    /// Returns `Ok(None)` when no credential is stored; callers treat that
    /// (and `enabled == false`) as a fatal setup error.
    async fn resolve(
        &self,
        tenant_id: TenantId,
        provider: Provider,
        environment: Environment,
    ) -> ConnectorResult<Option<Credential>>;
}

/// Postgres-backed credential resolver.
pub struct PgCredentialResolver {
    pool: PgPool,
}

impl PgCredentialResolver {
    /// Create a resolver over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    base_url: String,
    secret: String,
    enabled: bool,
}

#[async_trait]
impl CredentialResolver for PgCredentialResolver {
    async fn resolve(
        &self,
        tenant_id: TenantId,
        provider: Provider,
        environment: Environment,
    ) -> ConnectorResult<Option<Credential>> {
        let row: Option<CredentialRow> = sqlx::query_as(
            r"
            SELECT base_url, secret, enabled
            FROM connector_credentials
            WHERE tenant_id = $1 AND provider = $2 AND environment = $3
            ",
        )
        .bind(tenant_id)
        .bind(provider)
        .bind(environment)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ConnectorError::database_with_source("failed to load credential", e))?;

        Ok(row.map(|r| Credential {
            base_url: r.base_url,
            secret: r.secret,
            enabled: r.enabled,
        }))
    }
}
