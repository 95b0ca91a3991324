//! Payment reconciliation.
//!
//! Settlement transactions are registered against the Target invoice the
//! invoice links point at. A transaction whose invoice has not synced yet,
//! or whose invoice already carries a registered payment, is skipped; that
//! is expected steady-state behavior, not an error. The `payment_synced`
//! flag is write-once-true, so a payment is registered at most once per
//! invoice across repeated runs.

use ledgersync_connector::types::SourcePayment;
use tracing::{debug, warn};

use super::RunContext;
use crate::error::SyncResult;
use crate::store::InvoiceLink;
use crate::types::RunCounts;

pub(crate) async fn sync(ctx: &RunContext) -> SyncResult<RunCounts> {
    let payments = ctx.source.fetch_payments(ctx.since).await?;
    let mut counts = RunCounts::default();

    for payment in &payments {
        let link = ctx
            .links
            .invoice_link(ctx.tenant_id, ctx.environment, payment.invoice_id)
            .await?;

        match link {
            None => {
                // Invoice not synced yet; the next run will pick it up
                // after invoice reconciliation has caught up.
                debug!(
                    tenant_id = %ctx.tenant_id,
                    environment = %ctx.environment,
                    invoice_id = payment.invoice_id,
                    "Invoice not yet synced; skipping payment"
                );
                counts.record_ok();
            }
            Some(link) if link.payment_synced => {
                counts.record_ok();
            }
            Some(link) => match register(ctx, payment, &link).await {
                Ok(()) => counts.record_ok(),
                Err(e) => {
                    counts.record_failed();
                    warn!(
                        tenant_id = %ctx.tenant_id,
                        environment = %ctx.environment,
                        invoice_id = payment.invoice_id,
                        error = %e,
                        "Failed to register payment"
                    );
                }
            },
        }
    }

    Ok(counts)
}

async fn register(ctx: &RunContext, payment: &SourcePayment, link: &InvoiceLink) -> SyncResult<()> {
    // A crash between these two calls risks a duplicate registration next
    // run, never a lost one; accepted at-least-once tradeoff.
    ctx.target
        .register_payment(link.target_invoice_id, payment.amount, payment.payment_date)
        .await?;
    ctx.links
        .mark_payment_synced(ctx.tenant_id, ctx.environment, payment.invoice_id)
        .await?;
    Ok(())
}
