//! Product reconciliation.
//!
//! Structurally the customer procedure keyed by product code. Products
//! with a blank code are excluded from the input set entirely: without a
//! stable key they cannot be correlated, and that is out of scope rather
//! than a failure.

use chrono::Utc;
use ledgersync_connector::types::{ProductFields, SourceProduct, TargetRecord};
use tracing::warn;

use super::RunContext;
use crate::error::SyncResult;
use crate::hash::product_content_hash;
use crate::store::EntityLink;
use crate::types::RunCounts;

pub(crate) async fn sync(ctx: &RunContext) -> SyncResult<RunCounts> {
    let products = ctx.source.fetch_products().await?;
    let mut counts = RunCounts::default();

    for product in products.iter().filter(|p| !p.code.trim().is_empty()) {
        match sync_one(ctx, product).await {
            Ok(()) => counts.record_ok(),
            Err(e) => {
                counts.record_failed();
                warn!(
                    tenant_id = %ctx.tenant_id,
                    environment = %ctx.environment,
                    product_code = %product.code,
                    error = %e,
                    "Failed to sync product"
                );
            }
        }
    }

    Ok(counts)
}

async fn sync_one(ctx: &RunContext, product: &SourceProduct) -> SyncResult<()> {
    let hash = product_content_hash(product);
    let existing = ctx
        .links
        .product_link(ctx.tenant_id, ctx.environment, &product.code)
        .await?;

    let target_id = match existing {
        Some(link) if link.content_hash.as_deref() == Some(hash.as_str()) => {
            return Ok(());
        }
        Some(link) => {
            let current = match ctx.target.find_product_by_code(&product.code).await? {
                Some(found) => found,
                None => ctx.target.get_product(link.target_id).await?,
            };
            ctx.target
                .update_product(current.id, current.version, &fields(product))
                .await?;
            current.id
        }
        None => match ctx.target.find_product_by_code(&product.code).await? {
            Some(TargetRecord { id, .. }) => id,
            None => ctx.target.create_product(&fields(product)).await?,
        },
    };

    ctx.links
        .upsert_product_link(&EntityLink {
            tenant_id: ctx.tenant_id,
            environment: ctx.environment,
            source_key: product.code.clone(),
            target_id,
            content_hash: Some(hash),
            last_synced_at: Utc::now(),
        })
        .await
}

fn fields(product: &SourceProduct) -> ProductFields {
    ProductFields {
        code: product.code.clone(),
        name: product.name.clone(),
        description: product.description.clone(),
        price: product.price,
    }
}
