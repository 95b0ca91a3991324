//! Record types exchanged with the Source and Target systems.
//!
//! Entity schemas and field mappings are fixed per entity type; this is not
//! a generic ETL surface. Source types mirror what the upstream API
//! returns, Target types mirror what the downstream API accepts.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A customer as returned by the Source system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCustomer {
    /// Natural key: the customer number. May be empty for draft records,
    /// which cannot be correlated and are skipped.
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

/// A product as returned by the Source system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProduct {
    /// Natural key: the product code. Blank codes cannot be correlated.
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
}

/// One line of a Source invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInvoiceLine {
    /// Product code referencing the Source product catalogue.
    pub product_code: String,
    /// Product name as denormalized onto the invoice line.
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Discount percentage; only forwarded to the Target when positive.
    #[serde(default)]
    pub discount_percent: Decimal,
    /// Free-text specification for the line, if any.
    #[serde(default)]
    pub specification: Option<String>,
}

/// An invoice as returned by the Source system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInvoice {
    /// Source-internal invoice id (the correlation key).
    pub id: i64,
    /// Human-facing invoice number.
    pub invoice_number: i64,
    /// Natural key of the invoiced customer.
    pub customer_number: String,
    pub invoice_date: DateTime<Utc>,
    pub lines: Vec<SourceInvoiceLine>,
}

/// A settlement transaction as returned by the Source system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePayment {
    /// Source invoice id the payment settles.
    pub invoice_id: i64,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
}

/// The writable fields of a Target customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerFields {
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

/// The writable fields of a Target product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
}

/// A Target record reference with its optimistic-concurrency version.
///
/// Updates must present the current `version`; a stale version is rejected
/// by the Target API, so callers re-resolve it right before updating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: i64,
    pub version: i64,
}

/// One line of a Target order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    /// Target product id (resolved through the product mapping).
    pub product_id: i64,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Discount percentage; omitted entirely when not positive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_percent: Option<Decimal>,
}

/// An order to be created in the Target system.
///
/// The Target API models invoices as derived from orders; invoices are
/// never created directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    /// Target customer id (resolved through the customer mapping).
    pub customer_id: i64,
    pub order_date: NaiveDate,
    pub lines: Vec<OrderLine>,
}
