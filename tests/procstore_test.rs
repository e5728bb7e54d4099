//! End-to-end tests driving sessions, scopes and repositories against the
//! in-memory backend.

use procstore::prelude::*;

entity_id!(pub VendorId);
entity_id!(pub InvoiceId);

#[derive(Debug, Default)]
pub struct Vendor {
    core: EntityCore<VendorId>,
    name: Option<String>,
    credit_limit: Decimal,
    active: bool,
}

impl Vendor {
    fn named(name: &str) -> Self {
        let mut vendor = Vendor::default();
        vendor.set_name(Some(name));
        vendor
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn set_name(&mut self, value: Option<&str>) {
        self.core.assign_text(&mut self.name, value.map(str::to_string));
    }

    fn set_credit_limit(&mut self, value: Decimal) {
        self.core.assign(&mut self.credit_limit, value);
    }

    fn set_active(&mut self, value: bool) {
        self.core.assign(&mut self.active, value);
    }
}

impl Persistable for Vendor {
    type Id = VendorId;

    fn core(&self) -> &EntityCore<VendorId> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore<VendorId> {
        &mut self.core
    }

    fn validate(&self, errors: &mut ErrorList) {
        validate_length(self.name(), errors, 1, 50, "Name");
        validate_decimal_range(
            &self.credit_limit.to_string(),
            Decimal::ZERO,
            Decimal::from(1_000_000),
            2,
            errors,
            "Credit limit",
        );
    }
}

impl ProcedureEntity for Vendor {
    type Row = DataRow;

    fn entity_name() -> &'static str {
        "Vendor"
    }

    fn create_entity(row: DataRow) -> Result<Self, StoreError> {
        Ok(Vendor {
            core: EntityCore::loaded(
                row.get_id("VendorId")?,
                row.get_datetime("CreateDate")?,
                row.get_datetime("ModifyDate")?,
            ),
            name: row.get_opt_string("Name")?,
            credit_limit: row.get_decimal("CreditLimit")?,
            active: row.get_bool("Active")?,
        })
    }

    fn add_insert_update_params(&self, call: &mut ProcedureCall) {
        add_param_varchar(call, "@Name", self.name());
        add_param_money(call, "@CreditLimit", self.credit_limit);
        add_param_bool(call, "@Active", self.active);
    }
}

#[derive(Debug, Default)]
pub struct Invoice {
    core: EntityCore<InvoiceId>,
    vendor_id: VendorId,
    amount: Decimal,
}

impl Persistable for Invoice {
    type Id = InvoiceId;

    fn core(&self) -> &EntityCore<InvoiceId> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore<InvoiceId> {
        &mut self.core
    }
}

impl ProcedureEntity for Invoice {
    type Row = DataRow;

    fn entity_name() -> &'static str {
        "Invoice"
    }

    fn create_entity(row: DataRow) -> Result<Self, StoreError> {
        Ok(Invoice {
            core: EntityCore::loaded(
                row.get_id("InvoiceId")?,
                row.get_datetime("CreateDate")?,
                row.get_datetime("ModifyDate")?,
            ),
            vendor_id: row.get_id("VendorId")?,
            amount: row.get_decimal("Amount")?,
        })
    }

    fn add_insert_update_params(&self, call: &mut ProcedureCall) {
        add_param_input_id(call, "@VendorId", self.vendor_id);
        add_param_money(call, "@Amount", self.amount);
    }
}

const CONFIG: &str = r#"
[connections.erp]
host = "localhost"
port = 5432
database = "erp"
username = "app"
password = "secret"

[session]
leak_threshold = 5
"#;

fn procstore(db: &MemoryDatabase) -> ProcStore<MemoryConnector> {
    let config = AppConfig::from_toml_str(CONFIG).unwrap();
    ProcStore::new(MemoryConnector::new(db.clone()), &config, "erp").unwrap()
}

fn database() -> MemoryDatabase {
    MemoryDatabase::new()
        .with_table("Vendor")
        .with_table("Invoice")
}

#[tokio::test]
async fn acme_insert_get_delete() {
    let db = database();
    let store = procstore(&db);
    let vendors = GenericRepository::<Vendor, _>::new(store.session().clone());

    let mut acme = Vendor::named("Acme");
    assert!(!acme.is_persisted());
    vendors.insert(&mut acme).await.unwrap();
    assert!(acme.is_persisted());
    assert_ne!(acme.id().value(), 0);

    let loaded = vendors.get(acme.id()).await.unwrap();
    assert_eq!(loaded.name(), Some("Acme"));
    assert!(loaded.is_persisted());

    vendors.delete(&loaded).await.unwrap();
    assert!(matches!(
        vendors.get(acme.id()).await,
        Err(StoreError::RowNotFound { .. })
    ));
    store.session().assert_idle().unwrap();
}

#[tokio::test]
async fn completed_scope_commits_every_operation() {
    let db = database();
    let store = procstore(&db);
    let session = store.session();
    let vendors = GenericRepository::<Vendor, _>::new(session.clone());
    let invoices = GenericRepository::<Invoice, _>::new(session.clone());

    let scope = session.create_tran_scope();
    let mut vendor = Vendor::named("Acme");
    vendors.insert(&mut vendor).await.unwrap();
    let mut invoice = Invoice {
        vendor_id: vendor.id(),
        amount: Decimal::new(12_500, 2),
        ..Invoice::default()
    };
    invoices.insert(&mut invoice).await.unwrap();
    assert_eq!(db.row_count("Vendor"), 0);
    scope.complete().await.unwrap();

    assert_eq!(db.row_count("Vendor"), 1);
    assert_eq!(db.row_count("Invoice"), 1);
    let loaded = invoices.get(invoice.id()).await.unwrap();
    assert_eq!(loaded.vendor_id, vendor.id());
    assert_eq!(loaded.amount, Decimal::new(12_500, 2));
}

#[tokio::test]
async fn abandoned_scope_leaves_no_trace() {
    let db = database();
    let store = procstore(&db);
    let vendors = GenericRepository::<Vendor, _>::new(store.session().clone());

    {
        let _scope = store.session().create_tran_scope();
        vendors.insert(&mut Vendor::named("Acme")).await.unwrap();
        vendors.insert(&mut Vendor::named("Globex")).await.unwrap();
    }
    assert_eq!(db.row_count("Vendor"), 0);

    // The session keeps working after the rollback
    let mut initech = Vendor::named("Initech");
    vendors.insert(&mut initech).await.unwrap();
    assert_eq!(db.row_count("Vendor"), 1);
    assert_eq!(vendors.get(initech.id()).await.unwrap().name(), Some("Initech"));
    store.session().assert_idle().unwrap();
}

#[tokio::test]
async fn failure_inside_scope_rolls_back_earlier_work() {
    let db = MemoryDatabase::new().with_table("Vendor");
    let store = procstore(&db);
    let vendors = GenericRepository::<Vendor, _>::new(store.session().clone());
    let invoices = GenericRepository::<Invoice, _>::new(store.session().clone());

    async fn save_both(
        session: &DbSession<MemoryConnector>,
        vendors: &GenericRepository<Vendor, MemoryConnector>,
        invoices: &GenericRepository<Invoice, MemoryConnector>,
    ) -> Result<(), StoreError> {
        let scope = session.create_tran_scope();
        let mut vendor = Vendor::named("Acme");
        vendors.insert(&mut vendor).await?;
        let mut invoice = Invoice {
            vendor_id: vendor.id(),
            ..Invoice::default()
        };
        // No Invoice table: InsertInvoice does not exist
        invoices.insert(&mut invoice).await?;
        scope.complete().await
    }

    let result = save_both(store.session(), &vendors, &invoices).await;
    assert!(matches!(result, Err(StoreError::ProcedureFailed { .. })));
    assert_eq!(db.row_count("Vendor"), 0);
    store.session().assert_idle().unwrap();
}

#[tokio::test]
async fn forced_distributed_transaction_commits_both_connections() {
    let db = database();
    let store = procstore(&db);
    let session = store.session();
    let vendors = GenericRepository::<Vendor, _>::new(session.clone());

    let scope = session.create_tran_scope();
    session.force_distributed_transaction().await.unwrap();

    let held = session.get_connection().await.unwrap();
    let mut vendor = Vendor::named("Acme");
    vendors.insert(&mut vendor).await.unwrap();
    drop(held);

    scope.complete().await.unwrap();
    assert_eq!(db.connections_opened(), 2);
    assert_eq!(db.prepared_transactions(), 0);
    assert_eq!(db.row_count("Vendor"), 1);
}

#[tokio::test]
async fn distributed_transactions_can_be_disabled() {
    let db = database();
    let mut config = AppConfig::from_toml_str(CONFIG).unwrap();
    config.transaction.allow_distributed = false;
    let store = ProcStore::new(MemoryConnector::new(db.clone()), &config, "erp").unwrap();

    let _scope = store.session().create_tran_scope();
    let _first = store.session().get_connection().await.unwrap();
    assert!(matches!(
        store.session().get_connection().await,
        Err(StoreError::DistributedTransactionDisabled)
    ));
}

#[test]
fn dirty_tracking_ignores_unchanged_values() {
    let mut vendor = Vendor::default();
    assert!(!vendor.is_dirty());

    vendor.set_name(Some(""));
    vendor.set_credit_limit(Decimal::ZERO);
    vendor.set_active(false);
    assert!(!vendor.is_dirty());

    vendor.set_name(Some("Acme"));
    assert!(vendor.is_dirty());

    vendor.set_dirty(false);
    vendor.set_name(Some("Acme"));
    assert!(!vendor.is_dirty());

    vendor.set_active(true);
    assert!(vendor.is_dirty());
}

#[test]
fn identities_of_different_kinds_do_not_mix() {
    let vendor = VendorId::new(5);
    let invoice = InvoiceId::new(5);
    assert_eq!(vendor.value(), invoice.value());
    assert_ne!(vendor.erase(), invoice.erase());
    assert_eq!(vendor, VendorId::from(5));
    assert!(VendorId::default().is_null());
}

#[test]
fn sub_cent_credit_limit_blocks_save() {
    let mut vendor = Vendor::named("Acme");
    vendor.set_credit_limit("19.995".parse().unwrap());
    let errors = vendor.validation_errors();
    assert!(errors.blocks_save());
    assert_eq!(errors.max_severity(), ErrorSeverity::Severe);

    vendor.set_credit_limit("19.99".parse().unwrap());
    assert!(vendor.validation_errors().is_empty());
}

#[tokio::test]
async fn persisted_list_saves_and_removes() {
    let db = database();
    let store = procstore(&db);
    let mut list = PersistedList::new(GenericRepository::<Vendor, _>::new(
        store.session().clone(),
    ));

    list.push(Vendor::named("Acme"));
    list.push(Vendor::named("Globex"));
    assert_eq!(list.save_dirty().await.unwrap(), 2);
    assert!(list.iter().all(|v| v.is_persisted() && !v.is_dirty()));

    list.get_mut(1).unwrap().set_active(true);
    assert_eq!(list.save_dirty().await.unwrap(), 1);
    let globex = list.get(1).unwrap().id();
    assert!(db
        .committed_row("Vendor", globex.value())
        .unwrap()
        .get_bool("Active")
        .unwrap());

    let removed = list.remove(0).await.unwrap();
    assert!(removed.is_deleted());
    assert_eq!(db.row_count("Vendor"), 1);
}

#[tokio::test]
async fn repository_registry() {
    let db = database();
    let mut store = procstore(&db);
    let vendors = GenericRepository::<Vendor, _>::new(store.session().clone());
    let invoices = GenericRepository::<Invoice, _>::new(store.session().clone());

    store.register_repository("vendors", vendors.clone()).unwrap();
    store.register_repository("invoices", invoices).unwrap();
    assert!(matches!(
        store.register_repository("vendors", vendors),
        Err(ProcStoreError::RepositoryAlreadyRegistered(_))
    ));

    let mut names = store.list_repositories();
    names.sort();
    assert_eq!(names, ["invoices", "vendors"]);

    let vendors = store
        .get_repository::<GenericRepository<Vendor, MemoryConnector>>("vendors")
        .unwrap();
    let mut acme = Vendor::named("Acme");
    vendors.insert(&mut acme).await.unwrap();

    // Registered under another type
    assert!(store
        .get_repository::<GenericRepository<Invoice, MemoryConnector>>("vendors")
        .is_err());

    store.unregister_repository("vendors").unwrap();
    assert!(matches!(
        store.unregister_repository("vendors"),
        Err(ProcStoreError::RepositoryNotFound(_))
    ));
}

#[tokio::test]
async fn health_check_and_shutdown() {
    let db = database();
    let store = procstore(&db);

    store.health_check().await.unwrap();
    assert_eq!(db.open_connections(), 1);

    store.shutdown().await;
    assert_eq!(db.open_connections(), 0);
    assert!(matches!(
        store.health_check().await,
        Err(ProcStoreError::Store(StoreError::InvalidState(_)))
    ));
}

#[tokio::test]
async fn unreachable_database_fails_health_check() {
    let db = database();
    db.fail_next_connects(1);
    let store = procstore(&db);

    assert!(matches!(
        store.health_check().await,
        Err(ProcStoreError::Store(StoreError::ConnectionFailed { .. }))
    ));
    store.session().assert_idle().unwrap();
}
