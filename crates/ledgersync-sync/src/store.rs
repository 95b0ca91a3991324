//! Identity mapping store.
//!
//! Persistent correlation between source natural keys and Target ids, one
//! table per correlatable entity kind. Payments carry no table of their
//! own; they piggyback on the invoice links' `payment_synced` flag.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgersync_core::{Environment, TenantId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;

use crate::error::SyncResult;

/// Correlation between one source natural key and one Target record.
///
/// At most one link exists per `(tenant, environment, source_key)`. The
/// `target_id` is stable once written: updates reuse it, nothing ever
/// re-points it at a different logical Target record. Links are never
/// deleted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EntityLink {
    pub tenant_id: TenantId,
    pub environment: Environment,
    /// Natural key in the Source system (customer number, product code).
    pub source_key: String,
    /// Id of the correlated record in the Target system.
    pub target_id: i64,
    /// Content hash at the time of the last successful sync.
    pub content_hash: Option<String>,
    pub last_synced_at: DateTime<Utc>,
}

/// Correlation for one synced invoice.
///
/// Created once when the source invoice is first turned into a Target
/// invoice; mutated exactly once more, when the payment reconciliation
/// flips `payment_synced`. The flag is monotonic: false to true only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvoiceLink {
    pub tenant_id: TenantId,
    pub environment: Environment,
    /// Source-internal invoice id.
    pub source_invoice_id: i64,
    /// Human-facing source invoice number.
    pub source_invoice_number: i64,
    /// Id of the created invoice in the Target system.
    pub target_invoice_id: i64,
    pub payment_synced: bool,
    pub last_synced_at: DateTime<Utc>,
}

/// Persistent access to entity and invoice links.
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// Look up a customer link by natural key.
    async fn customer_link(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_key: &str,
    ) -> SyncResult<Option<EntityLink>>;

    /// Insert or update a customer link.
    async fn upsert_customer_link(&self, link: &EntityLink) -> SyncResult<()>;

    /// Look up a product link by product code.
    async fn product_link(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_key: &str,
    ) -> SyncResult<Option<EntityLink>>;

    /// Insert or update a product link.
    async fn upsert_product_link(&self, link: &EntityLink) -> SyncResult<()>;

    /// Look up an invoice link by source invoice id.
    async fn invoice_link(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_invoice_id: i64,
    ) -> SyncResult<Option<InvoiceLink>>;

    /// Insert a new invoice link (with `payment_synced = false`).
    async fn insert_invoice_link(&self, link: &InvoiceLink) -> SyncResult<()>;

    /// All source invoice ids already linked in this environment.
    async fn linked_invoice_ids(
        &self,
        tenant_id: TenantId,
        environment: Environment,
    ) -> SyncResult<HashSet<i64>>;

    /// Flip `payment_synced` to true.
    ///
    /// Returns `false` when the link is absent or the flag was already
    /// set; the flag is never reset by any code path.
    async fn mark_payment_synced(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_invoice_id: i64,
    ) -> SyncResult<bool>;
}

/// Postgres-backed link repository.
pub struct PgLinkRepository {
    pool: PgPool,
}

impl PgLinkRepository {
    /// Create a repository over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn entity_link(
        &self,
        table: &str,
        tenant_id: TenantId,
        environment: Environment,
        source_key: &str,
    ) -> SyncResult<Option<EntityLink>> {
        let sql = format!(
            r"
            SELECT tenant_id, environment, source_key, target_id, content_hash, last_synced_at
            FROM {table}
            WHERE tenant_id = $1 AND environment = $2 AND source_key = $3
            "
        );

        let link = sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(environment)
            .bind(source_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(link)
    }

    async fn upsert_entity_link(&self, table: &str, link: &EntityLink) -> SyncResult<()> {
        let sql = format!(
            r"
            INSERT INTO {table}
                (tenant_id, environment, source_key, target_id, content_hash, last_synced_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, environment, source_key)
            DO UPDATE SET
                target_id = EXCLUDED.target_id,
                content_hash = EXCLUDED.content_hash,
                last_synced_at = EXCLUDED.last_synced_at
            "
        );

        sqlx::query(&sql)
            .bind(link.tenant_id)
            .bind(link.environment)
            .bind(&link.source_key)
            .bind(link.target_id)
            .bind(&link.content_hash)
            .bind(link.last_synced_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl LinkRepository for PgLinkRepository {
    async fn customer_link(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_key: &str,
    ) -> SyncResult<Option<EntityLink>> {
        self.entity_link("customer_links", tenant_id, environment, source_key)
            .await
    }

    async fn upsert_customer_link(&self, link: &EntityLink) -> SyncResult<()> {
        self.upsert_entity_link("customer_links", link).await
    }

    async fn product_link(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_key: &str,
    ) -> SyncResult<Option<EntityLink>> {
        self.entity_link("product_links", tenant_id, environment, source_key)
            .await
    }

    async fn upsert_product_link(&self, link: &EntityLink) -> SyncResult<()> {
        self.upsert_entity_link("product_links", link).await
    }

    async fn invoice_link(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_invoice_id: i64,
    ) -> SyncResult<Option<InvoiceLink>> {
        let link = sqlx::query_as(
            r"
            SELECT tenant_id, environment, source_invoice_id, source_invoice_number,
                   target_invoice_id, payment_synced, last_synced_at
            FROM invoice_links
            WHERE tenant_id = $1 AND environment = $2 AND source_invoice_id = $3
            ",
        )
        .bind(tenant_id)
        .bind(environment)
        .bind(source_invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn insert_invoice_link(&self, link: &InvoiceLink) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO invoice_links
                (tenant_id, environment, source_invoice_id, source_invoice_number,
                 target_invoice_id, payment_synced, last_synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, environment, source_invoice_id) DO NOTHING
            ",
        )
        .bind(link.tenant_id)
        .bind(link.environment)
        .bind(link.source_invoice_id)
        .bind(link.source_invoice_number)
        .bind(link.target_invoice_id)
        .bind(link.payment_synced)
        .bind(link.last_synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn linked_invoice_ids(
        &self,
        tenant_id: TenantId,
        environment: Environment,
    ) -> SyncResult<HashSet<i64>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            r"
            SELECT source_invoice_id
            FROM invoice_links
            WHERE tenant_id = $1 AND environment = $2
            ",
        )
        .bind(tenant_id)
        .bind(environment)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn mark_payment_synced(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_invoice_id: i64,
    ) -> SyncResult<bool> {
        // The guard keeps the flag monotonic: a row with the flag already
        // set matches zero rows and is reported as such.
        let result = sqlx::query(
            r"
            UPDATE invoice_links
            SET payment_synced = TRUE, last_synced_at = NOW()
            WHERE tenant_id = $1 AND environment = $2 AND source_invoice_id = $3
              AND payment_synced = FALSE
            ",
        )
        .bind(tenant_id)
        .bind(environment)
        .bind(source_invoice_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
