//! Reconciliation engine.
//!
//! One entry point per run: [`SyncEngine::run`] resolves credentials,
//! claims the run lease, dispatches on [`EntityKind`] to the matching
//! reconciler, and finalizes the run row. Per-record failures are counted
//! and logged inside the reconcilers and never abort a run; only setup or
//! transport errors outside the per-record loop fail a run.

mod customers;
mod invoices;
mod payments;
mod products;

use chrono::{DateTime, Utc};
use ledgersync_connector::{
    ClientFactory, Credential, CredentialResolver, Provider, SourceClient, TargetClient,
};
use ledgersync_core::{Environment, TenantId};
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::error::{SyncError, SyncResult};
use crate::runs::RunRepository;
use crate::store::LinkRepository;
use crate::types::{EntityKind, RunCounts};

/// Everything one reconciliation run needs.
pub(crate) struct RunContext {
    pub source: Arc<dyn SourceClient>,
    pub target: Arc<dyn TargetClient>,
    pub links: Arc<dyn LinkRepository>,
    pub tenant_id: TenantId,
    pub environment: Environment,
    /// Incremental-window lower bound (windowed kinds only).
    pub since: Option<DateTime<Utc>>,
}

/// The reconciliation engine.
pub struct SyncEngine {
    credentials: Arc<dyn CredentialResolver>,
    clients: Arc<dyn ClientFactory>,
    links: Arc<dyn LinkRepository>,
    runs: Arc<dyn RunRepository>,
}

impl SyncEngine {
    /// Create an engine over the given collaborators.
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialResolver>,
        clients: Arc<dyn ClientFactory>,
        links: Arc<dyn LinkRepository>,
        runs: Arc<dyn RunRepository>,
    ) -> Self {
        Self {
            credentials,
            clients,
            links,
            runs,
        }
    }

    /// Access to the run repository (dashboards, health checks).
    #[must_use]
    pub fn runs(&self) -> &Arc<dyn RunRepository> {
        &self.runs
    }

    /// Run one reconciliation for `(tenant, entity, environment)`.
    ///
    /// Raises only for setup-level conditions: missing/disabled
    /// credentials, a held run lease, or a transport failure outside the
    /// per-record loop. Per-record failures are reported in the returned
    /// counts, never raised.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, entity = %entity, environment = %environment))]
    pub async fn run(
        &self,
        entity: EntityKind,
        tenant_id: TenantId,
        environment: Environment,
    ) -> SyncResult<RunCounts> {
        let started_at = Utc::now();

        let Some(run) = self
            .runs
            .claim(tenant_id, entity, environment, started_at)
            .await?
        else {
            return Err(SyncError::AlreadyRunning {
                entity,
                environment,
            });
        };

        info!(run_id = %run.id, "Started reconciliation run");

        match self.execute(entity, tenant_id, environment).await {
            Ok(counts) => {
                // The window boundary is the run's start time so records
                // created mid-run are picked up again next time.
                self.runs.complete(run.id, counts, started_at).await?;
                info!(
                    run_id = %run.id,
                    processed = counts.processed,
                    failed = counts.failed,
                    "Completed reconciliation run"
                );
                Ok(counts)
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "Reconciliation run failed");
                self.runs
                    .fail(run.id, &e.to_string(), RunCounts::default())
                    .await?;
                Err(e)
            }
        }
    }

    /// Resolve credentials, build clients and dispatch to the reconciler.
    async fn execute(
        &self,
        entity: EntityKind,
        tenant_id: TenantId,
        environment: Environment,
    ) -> SyncResult<RunCounts> {
        let source_credential = self
            .resolve_credential(tenant_id, Provider::Source, environment)
            .await?;
        let target_credential = self
            .resolve_credential(tenant_id, Provider::Target, environment)
            .await?;

        let source = self.clients.source(&source_credential)?;
        let target = self.clients.target(&target_credential)?;

        let since = if entity.is_windowed() {
            self.runs
                .last_success_sync_at(tenant_id, entity, environment)
                .await?
        } else {
            None
        };

        let ctx = RunContext {
            source,
            target,
            links: Arc::clone(&self.links),
            tenant_id,
            environment,
            since,
        };

        match entity {
            EntityKind::Customer => customers::sync(&ctx).await,
            EntityKind::Product => products::sync(&ctx).await,
            EntityKind::Invoice => invoices::sync(&ctx).await,
            EntityKind::Payment => payments::sync(&ctx).await,
        }
    }

    async fn resolve_credential(
        &self,
        tenant_id: TenantId,
        provider: Provider,
        environment: Environment,
    ) -> SyncResult<Credential> {
        let credential = self
            .credentials
            .resolve(tenant_id, provider, environment)
            .await?
            .ok_or(SyncError::CredentialsMissing {
                provider,
                environment,
            })?;

        if !credential.enabled {
            return Err(SyncError::CredentialsDisabled {
                provider,
                environment,
            });
        }

        Ok(credential)
    }
}
