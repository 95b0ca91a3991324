//! Invoice reconciliation.
//!
//! Invoices are treated as immutable once created, so membership in the
//! invoice links decides, not hashing. New invoices are fetched over the
//! incremental window and created in the Target in two phases: first an
//! order, then the invoice derived from it.

use chrono::Utc;
use ledgersync_connector::types::{NewOrder, OrderLine, SourceInvoice, SourceInvoiceLine};
use rust_decimal::Decimal;
use tracing::warn;

use super::RunContext;
use crate::error::{SyncError, SyncResult};
use crate::store::InvoiceLink;
use crate::types::RunCounts;

pub(crate) async fn sync(ctx: &RunContext) -> SyncResult<RunCounts> {
    let invoices = ctx.source.fetch_invoices(ctx.since).await?;
    let synced = ctx
        .links
        .linked_invoice_ids(ctx.tenant_id, ctx.environment)
        .await?;
    let mut counts = RunCounts::default();

    for invoice in &invoices {
        if synced.contains(&invoice.id) {
            // Already represented in the Target; idempotent no-op.
            counts.record_ok();
            continue;
        }

        match sync_one(ctx, invoice).await {
            Ok(()) => counts.record_ok(),
            Err(e) => {
                counts.record_failed();
                warn!(
                    tenant_id = %ctx.tenant_id,
                    environment = %ctx.environment,
                    invoice_id = invoice.id,
                    invoice_number = invoice.invoice_number,
                    error = %e,
                    "Failed to sync invoice"
                );
            }
        }
    }

    Ok(counts)
}

async fn sync_one(ctx: &RunContext, invoice: &SourceInvoice) -> SyncResult<()> {
    // Customers must sync first; an unmapped customer is a per-record
    // failure, not something this run retries.
    let customer_link = ctx
        .links
        .customer_link(ctx.tenant_id, ctx.environment, &invoice.customer_number)
        .await?
        .ok_or_else(|| SyncError::UnmappedCustomer {
            customer_number: invoice.customer_number.clone(),
        })?;

    // Only lines whose product is mapped can be represented.
    let mut lines = Vec::new();
    for line in &invoice.lines {
        if let Some(product_link) = ctx
            .links
            .product_link(ctx.tenant_id, ctx.environment, &line.product_code)
            .await?
        {
            lines.push(build_order_line(product_link.target_id, line));
        }
    }

    if lines.is_empty() {
        return Err(SyncError::NoMappedLines {
            invoice_id: invoice.id,
        });
    }

    let order = NewOrder {
        customer_id: customer_link.target_id,
        order_date: invoice.invoice_date.date_naive(),
        lines,
    };

    // Two-phase creation: the Target models invoices as derived from
    // orders, never created directly.
    let order_id = ctx.target.create_order(&order).await?;
    let target_invoice_id = ctx.target.create_invoice_from_order(order_id).await?;

    ctx.links
        .insert_invoice_link(&InvoiceLink {
            tenant_id: ctx.tenant_id,
            environment: ctx.environment,
            source_invoice_id: invoice.id,
            source_invoice_number: invoice.invoice_number,
            target_invoice_id,
            payment_synced: false,
            last_synced_at: Utc::now(),
        })
        .await
}

/// Build one Target order line from a source invoice line.
pub(crate) fn build_order_line(target_product_id: i64, line: &SourceInvoiceLine) -> OrderLine {
    let description = match line.specification.as_deref() {
        Some(spec) if !spec.trim().is_empty() => {
            format!("{} - {}", line.product_name, spec)
        }
        _ => line.product_name.clone(),
    };

    OrderLine {
        product_id: target_product_id,
        description,
        quantity: line.quantity,
        unit_price: line.unit_price,
        discount_percent: if line.discount_percent > Decimal::ZERO {
            Some(line.discount_percent)
        } else {
            None
        },
    }
}
