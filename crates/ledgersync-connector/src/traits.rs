//! Client traits for the two external systems.
//!
//! The reconciliation engine only ever sees these traits; the REST
//! implementations live in [`crate::source_rest`] and
//! [`crate::target_rest`], and tests substitute hand-written mocks.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::ConnectorResult;
use crate::types::{
    CustomerFields, NewOrder, ProductFields, SourceCustomer, SourceInvoice, SourcePayment,
    SourceProduct, TargetRecord,
};

/// Read-only client for the upstream Source accounting system.
///
/// Implementations paginate internally (page number + page size until a
/// short page is returned) and apply the incremental `since` filter
/// server-side where the API supports it.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Verify connectivity and credentials.
    async fn test_connection(&self) -> ConnectorResult<()>;

    /// Fetch all customers. Customer sets are assumed small enough to
    /// re-scan fully on every run.
    async fn fetch_customers(&self) -> ConnectorResult<Vec<SourceCustomer>>;

    /// Fetch all products.
    async fn fetch_products(&self) -> ConnectorResult<Vec<SourceProduct>>;

    /// Fetch invoices with an effective timestamp in `[since, now)`.
    /// `None` means an unbounded full backfill.
    async fn fetch_invoices(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> ConnectorResult<Vec<SourceInvoice>>;

    /// Fetch settlement transactions in `[since, now)`.
    async fn fetch_payments(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> ConnectorResult<Vec<SourcePayment>>;
}

/// Writable client for the downstream Target accounting system.
///
/// All update operations carry the Target's optimistic-concurrency
/// version; lookups by natural key exist so callers can resolve an already
/// created record without creating a duplicate.
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Verify connectivity and credentials.
    async fn test_connection(&self) -> ConnectorResult<()>;

    /// Look a customer up by its customer number.
    async fn find_customer_by_number(&self, number: &str)
        -> ConnectorResult<Option<TargetRecord>>;

    /// Fetch a customer by Target id.
    async fn get_customer(&self, id: i64) -> ConnectorResult<TargetRecord>;

    /// Create a customer; returns the new Target id.
    async fn create_customer(&self, fields: &CustomerFields) -> ConnectorResult<i64>;

    /// Update a customer by id, presenting the current version.
    async fn update_customer(
        &self,
        id: i64,
        version: i64,
        fields: &CustomerFields,
    ) -> ConnectorResult<()>;

    /// Look a product up by its product code.
    async fn find_product_by_code(&self, code: &str) -> ConnectorResult<Option<TargetRecord>>;

    /// Fetch a product by Target id.
    async fn get_product(&self, id: i64) -> ConnectorResult<TargetRecord>;

    /// Create a product; returns the new Target id.
    async fn create_product(&self, fields: &ProductFields) -> ConnectorResult<i64>;

    /// Update a product by id, presenting the current version.
    async fn update_product(
        &self,
        id: i64,
        version: i64,
        fields: &ProductFields,
    ) -> ConnectorResult<()>;

    /// Create an order; returns the new order id.
    async fn create_order(&self, order: &NewOrder) -> ConnectorResult<i64>;

    /// Turn a previously created order into an invoice; returns the new
    /// Target invoice id.
    async fn create_invoice_from_order(&self, order_id: i64) -> ConnectorResult<i64>;

    /// Register a payment against a Target invoice.
    async fn register_payment(
        &self,
        invoice_id: i64,
        amount: Decimal,
        payment_date: NaiveDate,
    ) -> ConnectorResult<()>;
}
