//! Customer reconciliation.
//!
//! Full re-scan of all source customers on every run; change detection is
//! hash-gated, so the dominant steady-state case (unchanged record) costs
//! no Target I/O at all.

use chrono::Utc;
use ledgersync_connector::types::{CustomerFields, SourceCustomer, TargetRecord};
use tracing::warn;

use super::RunContext;
use crate::error::SyncResult;
use crate::hash::customer_content_hash;
use crate::store::EntityLink;
use crate::types::RunCounts;

pub(crate) async fn sync(ctx: &RunContext) -> SyncResult<RunCounts> {
    let customers = ctx.source.fetch_customers().await?;
    let mut counts = RunCounts::default();

    for customer in &customers {
        // Records without a natural key cannot be correlated.
        if customer.number.trim().is_empty() {
            continue;
        }

        match sync_one(ctx, customer).await {
            Ok(()) => counts.record_ok(),
            Err(e) => {
                counts.record_failed();
                warn!(
                    tenant_id = %ctx.tenant_id,
                    environment = %ctx.environment,
                    customer_number = %customer.number,
                    error = %e,
                    "Failed to sync customer"
                );
            }
        }
    }

    Ok(counts)
}

async fn sync_one(ctx: &RunContext, customer: &SourceCustomer) -> SyncResult<()> {
    let hash = customer_content_hash(customer);
    let existing = ctx
        .links
        .customer_link(ctx.tenant_id, ctx.environment, &customer.number)
        .await?;

    let target_id = match existing {
        Some(link) if link.content_hash.as_deref() == Some(hash.as_str()) => {
            // Unchanged; skip all I/O.
            return Ok(());
        }
        Some(link) => {
            // Changed: re-resolve the current version by natural key so a
            // concurrent edit in the Target doesn't reject the update,
            // falling back to the stored id.
            let current = match ctx
                .target
                .find_customer_by_number(&customer.number)
                .await?
            {
                Some(found) => found,
                None => ctx.target.get_customer(link.target_id).await?,
            };
            ctx.target
                .update_customer(current.id, current.version, &fields(customer))
                .await?;
            current.id
        }
        None => {
            // No link yet. A prior run may have created the Target record
            // and crashed before writing the link, so search by natural
            // key before creating.
            match ctx
                .target
                .find_customer_by_number(&customer.number)
                .await?
            {
                Some(TargetRecord { id, .. }) => id,
                None => ctx.target.create_customer(&fields(customer)).await?,
            }
        }
    };

    ctx.links
        .upsert_customer_link(&EntityLink {
            tenant_id: ctx.tenant_id,
            environment: ctx.environment,
            source_key: customer.number.clone(),
            target_id,
            content_hash: Some(hash),
            last_synced_at: Utc::now(),
        })
        .await
}

fn fields(customer: &SourceCustomer) -> CustomerFields {
    CustomerFields {
        number: customer.number.clone(),
        name: customer.name.clone(),
        email: customer.email.clone(),
        phone: customer.phone.clone(),
        address1: customer.address1.clone(),
        address2: customer.address2.clone(),
        zip: customer.zip.clone(),
        city: customer.city.clone(),
    }
}
