//! Reconciliation engine tests.
//!
//! Exercises the four reconcilers and the shared run contract against
//! in-memory repositories and hand-written mock clients:
//! - idempotence: a second run with no upstream changes performs no I/O
//! - crash recovery: search-before-create never duplicates a Target record
//! - dependency ordering: invoices fail when their customer is unmapped
//! - payment monotonicity: at most one registration per invoice
//! - run lease: overlapping runs of the same combination are refused
//! - setup failures: missing credentials fail the run before any record

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use ledgersync_connector::error::ConnectorResult;
use ledgersync_connector::types::{
    CustomerFields, NewOrder, ProductFields, SourceCustomer, SourceInvoice, SourceInvoiceLine,
    SourcePayment, SourceProduct, TargetRecord,
};
use ledgersync_connector::{
    ClientFactory, Credential, CredentialResolver, Provider, SourceClient, TargetClient,
};
use ledgersync_core::{Environment, TenantId};
use ledgersync_sync::{
    EntityKind, EntityLink, InvoiceLink, LinkRepository, RunCounts, RunRepository, RunStatus,
    Schedule, ScheduleRepository, SchedulerConfig, SchedulerWorker, SyncEngine, SyncError,
    SyncRun,
};

// =============================================================================
// Mock Source client
// =============================================================================

#[derive(Default)]
struct MockSource {
    customers: Mutex<Vec<SourceCustomer>>,
    products: Mutex<Vec<SourceProduct>>,
    invoices: Mutex<Vec<SourceInvoice>>,
    payments: Mutex<Vec<SourcePayment>>,
    /// The `since` argument of every invoice fetch, in call order.
    invoice_windows: Mutex<Vec<Option<DateTime<Utc>>>>,
    payment_windows: Mutex<Vec<Option<DateTime<Utc>>>>,
}

#[async_trait]
impl SourceClient for MockSource {
    async fn test_connection(&self) -> ConnectorResult<()> {
        Ok(())
    }

    async fn fetch_customers(&self) -> ConnectorResult<Vec<SourceCustomer>> {
        Ok(self.customers.lock().unwrap().clone())
    }

    async fn fetch_products(&self) -> ConnectorResult<Vec<SourceProduct>> {
        Ok(self.products.lock().unwrap().clone())
    }

    async fn fetch_invoices(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> ConnectorResult<Vec<SourceInvoice>> {
        self.invoice_windows.lock().unwrap().push(since);
        Ok(self.invoices.lock().unwrap().clone())
    }

    async fn fetch_payments(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> ConnectorResult<Vec<SourcePayment>> {
        self.payment_windows.lock().unwrap().push(since);
        Ok(self.payments.lock().unwrap().clone())
    }
}

// =============================================================================
// Mock Target client
// =============================================================================

#[derive(Default)]
struct MockTarget {
    /// Customer number -> record.
    customers: Mutex<HashMap<String, TargetRecord>>,
    /// Product code -> record.
    products: Mutex<HashMap<String, TargetRecord>>,
    orders: Mutex<Vec<NewOrder>>,
    payments: Mutex<Vec<(i64, Decimal, NaiveDate)>>,
    next_id: AtomicI64,
    customer_creates: AtomicUsize,
    customer_updates: AtomicUsize,
    product_creates: AtomicUsize,
    product_updates: AtomicUsize,
}

impl MockTarget {
    fn new() -> Self {
        Self {
            next_id: AtomicI64::new(501),
            ..Self::default()
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Seed a customer as if created by an earlier (crashed) run.
    fn seed_customer(&self, number: &str) -> i64 {
        let id = self.allocate_id();
        self.customers
            .lock()
            .unwrap()
            .insert(number.to_string(), TargetRecord { id, version: 1 });
        id
    }

    fn seed_product(&self, code: &str) -> i64 {
        let id = self.allocate_id();
        self.products
            .lock()
            .unwrap()
            .insert(code.to_string(), TargetRecord { id, version: 1 });
        id
    }
}

#[async_trait]
impl TargetClient for MockTarget {
    async fn test_connection(&self) -> ConnectorResult<()> {
        Ok(())
    }

    async fn find_customer_by_number(
        &self,
        number: &str,
    ) -> ConnectorResult<Option<TargetRecord>> {
        Ok(self.customers.lock().unwrap().get(number).copied())
    }

    async fn get_customer(&self, id: i64) -> ConnectorResult<TargetRecord> {
        self.customers
            .lock()
            .unwrap()
            .values()
            .find(|r| r.id == id)
            .copied()
            .ok_or(ledgersync_connector::ConnectorError::RecordNotFound {
                identifier: id.to_string(),
            })
    }

    async fn create_customer(&self, fields: &CustomerFields) -> ConnectorResult<i64> {
        self.customer_creates.fetch_add(1, Ordering::SeqCst);
        let id = self.allocate_id();
        self.customers
            .lock()
            .unwrap()
            .insert(fields.number.clone(), TargetRecord { id, version: 1 });
        Ok(id)
    }

    async fn update_customer(
        &self,
        id: i64,
        version: i64,
        fields: &CustomerFields,
    ) -> ConnectorResult<()> {
        self.customer_updates.fetch_add(1, Ordering::SeqCst);
        let mut customers = self.customers.lock().unwrap();
        let record = customers.get_mut(&fields.number).ok_or(
            ledgersync_connector::ConnectorError::RecordNotFound {
                identifier: id.to_string(),
            },
        )?;
        // Optimistic concurrency: a stale version is rejected.
        assert_eq!(record.version, version, "stale version presented");
        record.version += 1;
        Ok(())
    }

    async fn find_product_by_code(&self, code: &str) -> ConnectorResult<Option<TargetRecord>> {
        Ok(self.products.lock().unwrap().get(code).copied())
    }

    async fn get_product(&self, id: i64) -> ConnectorResult<TargetRecord> {
        self.products
            .lock()
            .unwrap()
            .values()
            .find(|r| r.id == id)
            .copied()
            .ok_or(ledgersync_connector::ConnectorError::RecordNotFound {
                identifier: id.to_string(),
            })
    }

    async fn create_product(&self, fields: &ProductFields) -> ConnectorResult<i64> {
        self.product_creates.fetch_add(1, Ordering::SeqCst);
        let id = self.allocate_id();
        self.products
            .lock()
            .unwrap()
            .insert(fields.code.clone(), TargetRecord { id, version: 1 });
        Ok(id)
    }

    async fn update_product(
        &self,
        _id: i64,
        _version: i64,
        _fields: &ProductFields,
    ) -> ConnectorResult<()> {
        self.product_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_order(&self, order: &NewOrder) -> ConnectorResult<i64> {
        let id = self.allocate_id();
        self.orders.lock().unwrap().push(order.clone());
        Ok(id)
    }

    async fn create_invoice_from_order(&self, order_id: i64) -> ConnectorResult<i64> {
        Ok(order_id + 1000)
    }

    async fn register_payment(
        &self,
        invoice_id: i64,
        amount: Decimal,
        payment_date: NaiveDate,
    ) -> ConnectorResult<()> {
        self.payments
            .lock()
            .unwrap()
            .push((invoice_id, amount, payment_date));
        Ok(())
    }
}

// =============================================================================
// In-memory repositories
// =============================================================================

type LinkKey = (TenantId, Environment, String);

#[derive(Default)]
struct MemoryLinks {
    customers: Mutex<HashMap<LinkKey, EntityLink>>,
    products: Mutex<HashMap<LinkKey, EntityLink>>,
    invoices: Mutex<HashMap<(TenantId, Environment, i64), InvoiceLink>>,
}

impl MemoryLinks {
    fn customer_snapshot(&self) -> Vec<EntityLink> {
        let mut links: Vec<EntityLink> = self.customers.lock().unwrap().values().cloned().collect();
        links.sort_by(|a, b| a.source_key.cmp(&b.source_key));
        links
    }
}

#[async_trait]
impl LinkRepository for MemoryLinks {
    async fn customer_link(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_key: &str,
    ) -> Result<Option<EntityLink>, SyncError> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .get(&(tenant_id, environment, source_key.to_string()))
            .cloned())
    }

    async fn upsert_customer_link(&self, link: &EntityLink) -> Result<(), SyncError> {
        self.customers.lock().unwrap().insert(
            (link.tenant_id, link.environment, link.source_key.clone()),
            link.clone(),
        );
        Ok(())
    }

    async fn product_link(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_key: &str,
    ) -> Result<Option<EntityLink>, SyncError> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .get(&(tenant_id, environment, source_key.to_string()))
            .cloned())
    }

    async fn upsert_product_link(&self, link: &EntityLink) -> Result<(), SyncError> {
        self.products.lock().unwrap().insert(
            (link.tenant_id, link.environment, link.source_key.clone()),
            link.clone(),
        );
        Ok(())
    }

    async fn invoice_link(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_invoice_id: i64,
    ) -> Result<Option<InvoiceLink>, SyncError> {
        Ok(self
            .invoices
            .lock()
            .unwrap()
            .get(&(tenant_id, environment, source_invoice_id))
            .cloned())
    }

    async fn insert_invoice_link(&self, link: &InvoiceLink) -> Result<(), SyncError> {
        self.invoices
            .lock()
            .unwrap()
            .entry((link.tenant_id, link.environment, link.source_invoice_id))
            .or_insert_with(|| link.clone());
        Ok(())
    }

    async fn linked_invoice_ids(
        &self,
        tenant_id: TenantId,
        environment: Environment,
    ) -> Result<HashSet<i64>, SyncError> {
        Ok(self
            .invoices
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, e, _), _)| *t == tenant_id && *e == environment)
            .map(|((_, _, id), _)| *id)
            .collect())
    }

    async fn mark_payment_synced(
        &self,
        tenant_id: TenantId,
        environment: Environment,
        source_invoice_id: i64,
    ) -> Result<bool, SyncError> {
        let mut invoices = self.invoices.lock().unwrap();
        match invoices.get_mut(&(tenant_id, environment, source_invoice_id)) {
            Some(link) if !link.payment_synced => {
                link.payment_synced = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
struct MemoryRuns {
    runs: Mutex<Vec<SyncRun>>,
    running: Mutex<HashSet<(TenantId, EntityKind, Environment)>>,
}

#[async_trait]
impl RunRepository for MemoryRuns {
    async fn claim(
        &self,
        tenant_id: TenantId,
        entity: EntityKind,
        environment: Environment,
        started_at: DateTime<Utc>,
    ) -> Result<Option<SyncRun>, SyncError> {
        let mut running = self.running.lock().unwrap();
        if !running.insert((tenant_id, entity, environment)) {
            return Ok(None);
        }

        let run = SyncRun {
            id: Uuid::new_v4(),
            tenant_id,
            entity,
            environment,
            status: RunStatus::Running,
            records_processed: 0,
            records_failed: 0,
            error_message: None,
            started_at,
            completed_at: None,
            last_sync_at: None,
        };
        self.runs.lock().unwrap().push(run.clone());
        Ok(Some(run))
    }

    async fn complete(
        &self,
        run_id: Uuid,
        counts: RunCounts,
        last_sync_at: DateTime<Utc>,
    ) -> Result<SyncRun, SyncError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or(SyncError::RunNotFound { run_id })?;
        run.status = RunStatus::Success;
        run.records_processed = counts.processed;
        run.records_failed = counts.failed;
        run.completed_at = Some(Utc::now());
        run.last_sync_at = Some(last_sync_at);
        self.running
            .lock()
            .unwrap()
            .remove(&(run.tenant_id, run.entity, run.environment));
        Ok(run.clone())
    }

    async fn fail(
        &self,
        run_id: Uuid,
        error_message: &str,
        counts: RunCounts,
    ) -> Result<SyncRun, SyncError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or(SyncError::RunNotFound { run_id })?;
        run.status = RunStatus::Failed;
        run.records_processed = counts.processed;
        run.records_failed = counts.failed;
        run.error_message = Some(error_message.to_string());
        run.completed_at = Some(Utc::now());
        self.running
            .lock()
            .unwrap()
            .remove(&(run.tenant_id, run.entity, run.environment));
        Ok(run.clone())
    }

    async fn last_success_sync_at(
        &self,
        tenant_id: TenantId,
        entity: EntityKind,
        environment: Environment,
    ) -> Result<Option<DateTime<Utc>>, SyncError> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.entity == entity
                    && r.environment == environment
                    && r.status == RunStatus::Success
            })
            .filter_map(|r| r.last_sync_at)
            .max())
    }

    async fn latest_runs(&self, tenant_id: TenantId, limit: i64) -> Result<Vec<SyncRun>, SyncError> {
        let mut runs: Vec<SyncRun> = self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn running_runs(&self, tenant_id: TenantId) -> Result<Vec<SyncRun>, SyncError> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.status == RunStatus::Running)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Credentials and client factory
// =============================================================================

/// Resolver with independently controllable Source/Target credentials.
struct StaticCredentials {
    source: Option<Credential>,
    target: Option<Credential>,
}

impl StaticCredentials {
    fn both_enabled() -> Self {
        let credential = |name: &str| Credential {
            base_url: format!("https://{name}.example"),
            secret: "secret".to_string(),
            enabled: true,
        };
        Self {
            source: Some(credential("source")),
            target: Some(credential("target")),
        }
    }

    fn target_missing() -> Self {
        Self {
            target: None,
            ..Self::both_enabled()
        }
    }

    fn target_disabled() -> Self {
        let mut resolver = Self::both_enabled();
        if let Some(ref mut credential) = resolver.target {
            credential.enabled = false;
        }
        resolver
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(
        &self,
        _tenant_id: TenantId,
        provider: Provider,
        _environment: Environment,
    ) -> ConnectorResult<Option<Credential>> {
        Ok(match provider {
            Provider::Source => self.source.clone(),
            Provider::Target => self.target.clone(),
        })
    }
}

struct MockClientFactory {
    source: Arc<MockSource>,
    target: Arc<MockTarget>,
}

impl ClientFactory for MockClientFactory {
    fn source(&self, _credential: &Credential) -> ConnectorResult<Arc<dyn SourceClient>> {
        Ok(Arc::clone(&self.source) as Arc<dyn SourceClient>)
    }

    fn target(&self, _credential: &Credential) -> ConnectorResult<Arc<dyn TargetClient>> {
        Ok(Arc::clone(&self.target) as Arc<dyn TargetClient>)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

struct Fixture {
    engine: Arc<SyncEngine>,
    source: Arc<MockSource>,
    target: Arc<MockTarget>,
    links: Arc<MemoryLinks>,
    runs: Arc<MemoryRuns>,
    tenant_id: TenantId,
    environment: Environment,
}

impl Fixture {
    fn new() -> Self {
        Self::with_credentials(StaticCredentials::both_enabled())
    }

    fn with_credentials(credentials: StaticCredentials) -> Self {
        let source = Arc::new(MockSource::default());
        let target = Arc::new(MockTarget::new());
        let links = Arc::new(MemoryLinks::default());
        let runs = Arc::new(MemoryRuns::default());

        let engine = Arc::new(SyncEngine::new(
            Arc::new(credentials),
            Arc::new(MockClientFactory {
                source: Arc::clone(&source),
                target: Arc::clone(&target),
            }),
            Arc::clone(&links) as Arc<dyn LinkRepository>,
            Arc::clone(&runs) as Arc<dyn RunRepository>,
        ));

        Self {
            engine,
            source,
            target,
            links,
            runs,
            tenant_id: TenantId::new(),
            environment: Environment::Production,
        }
    }

    async fn run(&self, entity: EntityKind) -> Result<RunCounts, SyncError> {
        self.engine
            .run(entity, self.tenant_id, self.environment)
            .await
    }

    async fn latest_run(&self) -> SyncRun {
        self.runs
            .latest_runs(self.tenant_id, 1)
            .await
            .unwrap()
            .into_iter()
            .next()
            .expect("no runs recorded")
    }
}

fn customer(number: &str, name: &str, email: Option<&str>) -> SourceCustomer {
    SourceCustomer {
        number: number.to_string(),
        name: name.to_string(),
        email: email.map(str::to_string),
        phone: None,
        address1: None,
        address2: None,
        zip: None,
        city: None,
    }
}

fn product(code: &str, name: &str, price: Decimal) -> SourceProduct {
    SourceProduct {
        code: code.to_string(),
        name: name.to_string(),
        description: None,
        price,
    }
}

fn invoice_line(code: &str, name: &str) -> SourceInvoiceLine {
    SourceInvoiceLine {
        product_code: code.to_string(),
        product_name: name.to_string(),
        quantity: Decimal::new(1, 0),
        unit_price: Decimal::new(10000, 2),
        discount_percent: Decimal::ZERO,
        specification: None,
    }
}

fn invoice(id: i64, number: i64, customer_number: &str, lines: Vec<SourceInvoiceLine>) -> SourceInvoice {
    SourceInvoice {
        id,
        invoice_number: number,
        customer_number: customer_number.to_string(),
        invoice_date: Utc::now(),
        lines,
    }
}

fn payment(invoice_id: i64, amount: Decimal) -> SourcePayment {
    SourcePayment {
        invoice_id,
        amount,
        payment_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
    }
}

// =============================================================================
// Customer reconciliation
// =============================================================================

#[tokio::test]
async fn customer_sync_is_idempotent() {
    let fixture = Fixture::new();
    *fixture.source.customers.lock().unwrap() = vec![
        customer("100", "Acme", Some("billing@acme.test")),
        customer("200", "Globex", None),
    ];

    let counts = fixture.run(EntityKind::Customer).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 2, failed: 0 });
    assert_eq!(fixture.target.customer_creates.load(Ordering::SeqCst), 2);

    let snapshot = fixture.links.customer_snapshot();

    // Second run with no upstream changes: same counts, no Target I/O,
    // store unchanged.
    let counts = fixture.run(EntityKind::Customer).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 2, failed: 0 });
    assert_eq!(fixture.target.customer_creates.load(Ordering::SeqCst), 2);
    assert_eq!(fixture.target.customer_updates.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.links.customer_snapshot(), snapshot);
}

#[tokio::test]
async fn changed_customer_reuses_target_id() {
    let fixture = Fixture::new();
    *fixture.source.customers.lock().unwrap() =
        vec![customer("100", "Acme", Some("old@acme.test"))];

    fixture.run(EntityKind::Customer).await.unwrap();
    let before = fixture.links.customer_snapshot().remove(0);

    // Change the email upstream and re-run.
    *fixture.source.customers.lock().unwrap() =
        vec![customer("100", "Acme", Some("new@acme.test"))];
    let counts = fixture.run(EntityKind::Customer).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 1, failed: 0 });

    let after = fixture.links.customer_snapshot().remove(0);
    assert_eq!(after.target_id, before.target_id, "update must not re-point the link");
    assert_ne!(after.content_hash, before.content_hash);
    assert_eq!(fixture.target.customer_creates.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.target.customer_updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn crashed_run_recovery_adopts_existing_target_record() {
    let fixture = Fixture::new();
    // A prior run created the Target record but crashed before the link
    // write: the record exists, the store is empty.
    let existing_id = fixture.target.seed_customer("100");
    *fixture.source.customers.lock().unwrap() = vec![customer("100", "Acme", None)];

    let counts = fixture.run(EntityKind::Customer).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 1, failed: 0 });
    assert_eq!(
        fixture.target.customer_creates.load(Ordering::SeqCst),
        0,
        "search-before-create must prevent the duplicate"
    );
    assert_eq!(fixture.links.customer_snapshot()[0].target_id, existing_id);
}

#[tokio::test]
async fn customers_without_natural_key_are_skipped() {
    let fixture = Fixture::new();
    *fixture.source.customers.lock().unwrap() = vec![
        customer("", "Draft", None),
        customer("   ", "Whitespace", None),
        customer("100", "Acme", None),
    ];

    let counts = fixture.run(EntityKind::Customer).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 1, failed: 0 });
    assert_eq!(fixture.target.customer_creates.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Product reconciliation
// =============================================================================

#[tokio::test]
async fn product_sync_excludes_blank_codes() {
    let fixture = Fixture::new();
    *fixture.source.products.lock().unwrap() = vec![
        product("P1", "Widget", Decimal::new(9950, 2)),
        product("", "No code", Decimal::ZERO),
    ];

    let counts = fixture.run(EntityKind::Product).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 1, failed: 0 });
    assert_eq!(fixture.target.product_creates.load(Ordering::SeqCst), 1);

    // Idempotent second run.
    let counts = fixture.run(EntityKind::Product).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 1, failed: 0 });
    assert_eq!(fixture.target.product_creates.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.target.product_updates.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Invoice reconciliation
// =============================================================================

/// Seed customer and product mappings the invoice tests depend on.
async fn seed_mappings(fixture: &Fixture) -> (i64, i64) {
    let customer_target = fixture.target.seed_customer("100");
    let product_target = fixture.target.seed_product("P1");

    *fixture.source.customers.lock().unwrap() = vec![customer("100", "Acme", None)];
    *fixture.source.products.lock().unwrap() =
        vec![product("P1", "Widget", Decimal::new(9950, 2))];
    fixture.run(EntityKind::Customer).await.unwrap();
    fixture.run(EntityKind::Product).await.unwrap();

    (customer_target, product_target)
}

#[tokio::test]
async fn invoice_with_unmapped_customer_is_counted_failed() {
    let fixture = Fixture::new();
    *fixture.source.invoices.lock().unwrap() =
        vec![invoice(1001, 1001, "999", vec![invoice_line("P1", "Widget")])];

    let counts = fixture.run(EntityKind::Invoice).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 0, failed: 1 });
    assert!(fixture.target.orders.lock().unwrap().is_empty());

    // The run itself still completes as Success: per-record failures never
    // fail the run.
    let run = fixture.latest_run().await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.records_failed, 1);
}

#[tokio::test]
async fn invoice_lines_are_filtered_to_mapped_products() {
    let fixture = Fixture::new();
    let (customer_target, product_target) = seed_mappings(&fixture).await;

    *fixture.source.invoices.lock().unwrap() = vec![invoice(
        1001,
        1001,
        "100",
        vec![
            invoice_line("P1", "Widget"),
            invoice_line("P-UNKNOWN", "Mystery item"),
        ],
    )];

    let counts = fixture.run(EntityKind::Invoice).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 1, failed: 0 });

    let orders = fixture.target.orders.lock().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].customer_id, customer_target);
    assert_eq!(orders[0].lines.len(), 1, "unmapped line must be dropped");
    assert_eq!(orders[0].lines[0].product_id, product_target);
}

#[tokio::test]
async fn invoice_with_no_mappable_lines_fails_without_creating_anything() {
    let fixture = Fixture::new();
    seed_mappings(&fixture).await;

    *fixture.source.invoices.lock().unwrap() = vec![invoice(
        1002,
        1002,
        "100",
        vec![invoice_line("P-UNKNOWN", "Mystery item")],
    )];

    let counts = fixture.run(EntityKind::Invoice).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 0, failed: 1 });
    assert!(fixture.target.orders.lock().unwrap().is_empty());
    assert!(fixture
        .links
        .linked_invoice_ids(fixture.tenant_id, fixture.environment)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn already_linked_invoices_are_noops() {
    let fixture = Fixture::new();
    seed_mappings(&fixture).await;
    *fixture.source.invoices.lock().unwrap() =
        vec![invoice(1001, 1001, "100", vec![invoice_line("P1", "Widget")])];

    fixture.run(EntityKind::Invoice).await.unwrap();
    assert_eq!(fixture.target.orders.lock().unwrap().len(), 1);

    let counts = fixture.run(EntityKind::Invoice).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 1, failed: 0 });
    assert_eq!(
        fixture.target.orders.lock().unwrap().len(),
        1,
        "a linked invoice must never be re-created"
    );
}

#[tokio::test]
async fn invoice_window_starts_at_last_successful_run() {
    let fixture = Fixture::new();
    seed_mappings(&fixture).await;

    fixture.run(EntityKind::Invoice).await.unwrap();
    let first = fixture.latest_run().await;
    fixture.run(EntityKind::Invoice).await.unwrap();

    let windows = fixture.source.invoice_windows.lock().unwrap().clone();
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0], None, "first run is an unbounded backfill");
    assert_eq!(
        windows[1],
        first.last_sync_at,
        "second run starts at the prior run's boundary"
    );
}

// =============================================================================
// Payment reconciliation
// =============================================================================

#[tokio::test]
async fn payment_before_invoice_is_skipped_then_registered_exactly_once() {
    let fixture = Fixture::new();
    seed_mappings(&fixture).await;
    *fixture.source.payments.lock().unwrap() = vec![payment(1001, Decimal::new(10000, 2))];

    // Invoice 1001 not reconciled yet: skip, not a failure.
    let counts = fixture.run(EntityKind::Payment).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 1, failed: 0 });
    assert!(fixture.target.payments.lock().unwrap().is_empty());

    // Reconcile the invoice, then re-run payments.
    *fixture.source.invoices.lock().unwrap() =
        vec![invoice(1001, 1001, "100", vec![invoice_line("P1", "Widget")])];
    fixture.run(EntityKind::Invoice).await.unwrap();

    let counts = fixture.run(EntityKind::Payment).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 1, failed: 0 });
    assert_eq!(fixture.target.payments.lock().unwrap().len(), 1);

    let link = fixture
        .links
        .invoice_link(fixture.tenant_id, fixture.environment, 1001)
        .await
        .unwrap()
        .unwrap();
    assert!(link.payment_synced);

    // Re-running never registers twice; the flag is write-once-true.
    let counts = fixture.run(EntityKind::Payment).await.unwrap();
    assert_eq!(counts, RunCounts { processed: 1, failed: 0 });
    assert_eq!(fixture.target.payments.lock().unwrap().len(), 1);
    assert!(fixture
        .links
        .invoice_link(fixture.tenant_id, fixture.environment, 1001)
        .await
        .unwrap()
        .unwrap()
        .payment_synced);
}

// =============================================================================
// Run contract
// =============================================================================

#[tokio::test]
async fn missing_credentials_fail_the_run_with_a_safe_message() {
    let fixture = Fixture::with_credentials(StaticCredentials::target_missing());

    let err = fixture.run(EntityKind::Customer).await.unwrap_err();
    assert!(matches!(err, SyncError::CredentialsMissing { .. }));

    let run = fixture.latest_run().await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.error_message.as_deref(),
        Some("no target credentials configured for the production environment")
    );
}

#[tokio::test]
async fn disabled_credentials_fail_the_run() {
    let fixture = Fixture::with_credentials(StaticCredentials::target_disabled());

    let err = fixture.run(EntityKind::Customer).await.unwrap_err();
    assert!(matches!(err, SyncError::CredentialsDisabled { .. }));
    assert_eq!(fixture.latest_run().await.status, RunStatus::Failed);
}

#[tokio::test]
async fn overlapping_runs_of_the_same_combination_are_refused() {
    let fixture = Fixture::new();

    // Hold the lease as another in-flight run would.
    fixture
        .runs
        .claim(
            fixture.tenant_id,
            EntityKind::Customer,
            fixture.environment,
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();

    let err = fixture.run(EntityKind::Customer).await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadyRunning { .. }));

    // A different entity kind is unaffected.
    fixture.run(EntityKind::Product).await.unwrap();
}

#[tokio::test]
async fn failed_run_does_not_advance_the_window() {
    let fixture = Fixture::new();
    seed_mappings(&fixture).await;
    fixture.run(EntityKind::Invoice).await.unwrap();
    let boundary = fixture.latest_run().await.last_sync_at;

    // A run that fails at setup must not move the boundary.
    let broken = Fixture::with_credentials(StaticCredentials::target_missing());
    broken.run(EntityKind::Invoice).await.unwrap_err();
    assert_eq!(broken.latest_run().await.last_sync_at, None);

    // The healthy fixture still reports the old boundary.
    assert_eq!(
        fixture
            .runs
            .last_success_sync_at(fixture.tenant_id, EntityKind::Invoice, fixture.environment)
            .await
            .unwrap(),
        boundary
    );
}

// =============================================================================
// Scheduler dispatch
// =============================================================================

#[derive(Default)]
struct MemorySchedules {
    schedules: Mutex<Vec<Schedule>>,
    scheduled: Mutex<Vec<Uuid>>,
    completed: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl ScheduleRepository for MemorySchedules {
    async fn list_enabled(&self) -> Result<Vec<Schedule>, SyncError> {
        Ok(self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn mark_scheduled(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), SyncError> {
        self.scheduled.lock().unwrap().push(id);
        if let Some(schedule) = self.schedules.lock().unwrap().iter_mut().find(|s| s.id == id) {
            schedule.last_scheduled_at = Some(at);
        }
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), SyncError> {
        self.completed.lock().unwrap().push(id);
        if let Some(schedule) = self.schedules.lock().unwrap().iter_mut().find(|s| s.id == id) {
            schedule.last_completed_at = Some(at);
        }
        Ok(())
    }
}

fn worker_for(fixture: &Fixture, schedules: &Arc<MemorySchedules>) -> SchedulerWorker {
    schedules.schedules.lock().unwrap().push(Schedule {
        id: Uuid::new_v4(),
        tenant_id: fixture.tenant_id,
        entity: EntityKind::Customer,
        environment: fixture.environment,
        interval_spec: "every 15 minutes".to_string(),
        enabled: true,
        last_scheduled_at: None,
        last_completed_at: None,
    });

    SchedulerWorker::new(
        Arc::clone(&fixture.engine),
        Arc::clone(schedules) as Arc<dyn ScheduleRepository>,
        SchedulerConfig::default(),
    )
}

#[tokio::test]
async fn scheduler_records_dispatch_and_completion() {
    let fixture = Fixture::new();
    *fixture.source.customers.lock().unwrap() = vec![customer("100", "Acme", None)];
    let schedules = Arc::new(MemorySchedules::default());
    let worker = worker_for(&fixture, &schedules);

    worker.poll_once().await;

    assert_eq!(schedules.scheduled.lock().unwrap().len(), 1);
    assert_eq!(schedules.completed.lock().unwrap().len(), 1);
    assert_eq!(fixture.latest_run().await.status, RunStatus::Success);
    assert_eq!(fixture.target.customer_creates.load(Ordering::SeqCst), 1);

    // Dispatch bookkeeping took effect: not due again until the interval
    // elapses, so an immediate second pass dispatches nothing.
    worker.poll_once().await;
    assert_eq!(schedules.scheduled.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_dispatch_is_marked_scheduled_but_not_completed() {
    let fixture = Fixture::with_credentials(StaticCredentials::target_missing());
    let schedules = Arc::new(MemorySchedules::default());
    let worker = worker_for(&fixture, &schedules);

    worker.poll_once().await;

    // The dispatch itself is recorded, completion is not; the schedule
    // becomes due again once the interval elapses, with no backoff.
    assert_eq!(schedules.scheduled.lock().unwrap().len(), 1);
    assert!(schedules.completed.lock().unwrap().is_empty());
    assert_eq!(fixture.latest_run().await.status, RunStatus::Failed);
    assert_eq!(
        schedules.schedules.lock().unwrap()[0].last_completed_at,
        None
    );
}
