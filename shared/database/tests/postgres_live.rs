//! Repository tests against a live PostgreSQL.
//!
//! Run with a disposable database:
//! `PHARMY_TEST_DATABASE_URL=postgres://... cargo test -p pharmy-database -- --ignored`

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use pharmy_database::{
    create_postgres_pool, migrations::run_postgres_migrations, AuditRepository, BatchRepository, MovementFilter,
    PostgresPool, PrescriptionRepository, ProductRepository, ReorderRepository, SaleRepository, StockRepository,
    SupplierRepository, TenantRepository, UserRepository,
};
use pharmy_models::{
    generate_alerts, AlertPolicy, AuditAction, AuditEntry, Batch, BatchDateError, CreatePrescription, DraftLine,
    MovementType, PaymentMethod, Prescription, PrescriptionItem, PrescriptionStatus, Product, ProductCategory,
    ReorderSuggestion, SaleDraft, SaleStatus, StockAdjustment, StockError, Supplier, Tenant, UpdateBatch, User,
    UserRole,
};

async fn pool() -> PostgresPool {
    let url = std::env::var("PHARMY_TEST_DATABASE_URL").expect("PHARMY_TEST_DATABASE_URL must be set");
    let pool = create_postgres_pool(&url, 2, std::time::Duration::from_secs(5))
        .await
        .expect("database reachable");
    run_postgres_migrations(&pool).await.expect("migrations apply");
    pool
}

struct Fixture {
    tenant: Tenant,
    admin: User,
    product: Product,
    supplier: Supplier,
}

async fn fixture(pool: &PostgresPool) -> Fixture {
    let tenant = Tenant::new(format!("Live Test Pharmacy {}", Uuid::new_v4()));
    let admin = User::new(
        tenant.id,
        "Asha Rao".to_string(),
        format!("asha+{}@example.com", Uuid::new_v4()),
        UserRole::Admin,
        "sha256$1$00$00".to_string(),
    );
    TenantRepository::new(pool.clone())
        .create_with_admin(&tenant, &admin)
        .await
        .unwrap();

    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4(),
        tenant_id: tenant.id,
        sku: "PCM-500".to_string(),
        name: "Paracetamol 500mg".to_string(),
        description: None,
        category: ProductCategory::Otc,
        unit: "strip".to_string(),
        hsn_code: None,
        gst_rate: 12.0,
        price: 30.0,
        reorder_level: 10,
        requires_prescription: false,
        created_at: now,
        updated_at: now,
    };
    ProductRepository::new(pool.clone()).create(&product).await.unwrap();

    let supplier = Supplier {
        id: Uuid::new_v4(),
        tenant_id: tenant.id,
        name: "Medline Distributors".to_string(),
        email: None,
        phone: None,
        address: None,
        gst_number: None,
        contact_person: None,
        created_at: now,
        updated_at: now,
    };
    SupplierRepository::new(pool.clone()).create(&supplier).await.unwrap();

    Fixture {
        tenant,
        admin,
        product,
        supplier,
    }
}

fn batch(f: &Fixture, number: &str, expires_in_days: i64, quantity: i32) -> Batch {
    let now = Utc::now();
    let today = now.date_naive();
    Batch {
        id: Uuid::new_v4(),
        tenant_id: f.tenant.id,
        product_id: f.product.id,
        supplier_id: f.supplier.id,
        batch_number: number.to_string(),
        mfg_date: today - Duration::days(30),
        expiry_date: today + Duration::days(expires_in_days),
        quantity,
        cost_price: 20.0,
        selling_price: 30.0,
        created_at: now,
        updated_at: now,
    }
}

fn draft(f: &Fixture, quantity: i32) -> SaleDraft {
    SaleDraft {
        tenant_id: f.tenant.id,
        sold_by: f.admin.id,
        customer_name: Some("Walk-in".to_string()),
        customer_phone: None,
        prescription_id: None,
        payment_method: PaymentMethod::Cash,
        discount: 0.0,
        lines: vec![DraftLine {
            product_id: f.product.id,
            product_name: f.product.name.clone(),
            batch_id: None,
            quantity,
            unit_price: None,
            gst_rate: f.product.gst_rate,
        }],
    }
}

#[tokio::test]
#[ignore]
async fn sale_draws_first_expiring_batch_and_cancel_restores_it() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    let batches = BatchRepository::new(pool.clone());

    let late = batch(&f, "B-LATE", 200, 10);
    let early = batch(&f, "B-EARLY", 40, 4);
    batches.create(&late, f.admin.id).await.unwrap();
    batches.create(&early, f.admin.id).await.unwrap();

    let sales = SaleRepository::new(pool.clone());
    let today = Utc::now().date_naive();
    let sale = sales.create(&draft(&f, 6), today).await.unwrap();

    assert_eq!(sale.sale.status, SaleStatus::Completed);
    assert_eq!(sale.items.len(), 2);
    assert_eq!(sale.items[0].batch_id, early.id);
    assert_eq!(sale.items[0].quantity, 4);
    assert_eq!(sale.items[1].batch_id, late.id);
    assert_eq!(sale.items[1].quantity, 2);

    let remaining = batches.find_by_id(f.tenant.id, late.id).await.unwrap().unwrap();
    assert_eq!(remaining.batch.quantity, 8);

    let cancelled = sales
        .cancel(f.tenant.id, sale.sale.id, f.admin.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.sale.status, SaleStatus::Cancelled);
    let restored = batches.find_by_id(f.tenant.id, early.id).await.unwrap().unwrap();
    assert_eq!(restored.batch.quantity, 4);

    assert!(sales.cancel(f.tenant.id, sale.sale.id, f.admin.id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn oversell_is_rejected_without_touching_stock() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    let batches = BatchRepository::new(pool.clone());
    let only = batch(&f, "B-ONLY", 90, 3);
    batches.create(&only, f.admin.id).await.unwrap();

    let err = SaleRepository::new(pool.clone())
        .create(&draft(&f, 5), Utc::now().date_naive())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StockError>(),
        Some(StockError::Insufficient { available: 3, .. })
    ));

    let unchanged = batches.find_by_id(f.tenant.id, only.id).await.unwrap().unwrap();
    assert_eq!(unchanged.batch.quantity, 3);
}

#[tokio::test]
#[ignore]
async fn audit_chain_verifies_per_tenant() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    let audit = AuditRepository::new(pool.clone());

    for n in 0..3 {
        audit
            .append(AuditEntry::new(
                f.tenant.id,
                AuditAction::StockAdjusted,
                "batch",
                Uuid::new_v4(),
                Some(f.admin.id),
                json!({ "change": n }),
            ))
            .await
            .unwrap();
    }

    let verification = audit.verify(f.tenant.id).await.unwrap();
    assert!(verification.is_valid);
    assert_eq!(verification.entries_verified, 3);
    assert!(verification.broken_links.is_empty());
}

async fn adjustments_for(pool: &PostgresPool, f: &Fixture, batch_id: Uuid) -> Vec<i32> {
    let filter = MovementFilter {
        batch_id: Some(batch_id),
        movement_type: Some(MovementType::Adjustment),
        ..Default::default()
    };
    StockRepository::new(pool.clone())
        .movements(f.tenant.id, &filter, 50)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.movement.quantity)
        .collect()
}

#[tokio::test]
#[ignore]
async fn renaming_a_batch_keeps_stock_sold_since_it_was_read() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    let batches = BatchRepository::new(pool.clone());
    let stock = batch(&f, "B-RENAME", 120, 10);
    batches.create(&stock, f.admin.id).await.unwrap();

    // The editor loaded the batch while it still held 10 units.
    let seen = batches.find_by_id(f.tenant.id, stock.id).await.unwrap().unwrap();
    assert_eq!(seen.batch.quantity, 10);

    let today = Utc::now().date_naive();
    SaleRepository::new(pool.clone()).create(&draft(&f, 4), today).await.unwrap();

    let rename = UpdateBatch {
        batch_number: Some("B-RENAMED".to_string()),
        ..Default::default()
    };
    let updated = batches
        .update(f.tenant.id, stock.id, &rename, today, f.admin.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.batch_number, "B-RENAMED");
    assert_eq!(updated.quantity, 6);

    let stored = batches.find_by_id(f.tenant.id, stock.id).await.unwrap().unwrap();
    assert_eq!(stored.batch.quantity, 6);
    assert!(adjustments_for(&pool, &f, stock.id).await.is_empty());
}

#[tokio::test]
#[ignore]
async fn batch_quantity_edit_books_an_adjustment() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    let batches = BatchRepository::new(pool.clone());
    let stock = batch(&f, "B-EDIT", 120, 10);
    batches.create(&stock, f.admin.id).await.unwrap();
    let today = Utc::now().date_naive();

    let recount = UpdateBatch {
        quantity: Some(12),
        selling_price: Some(32.5),
        ..Default::default()
    };
    let updated = batches
        .update(f.tenant.id, stock.id, &recount, today, f.admin.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.quantity, 12);
    assert_eq!(updated.selling_price, 32.5);
    assert_eq!(adjustments_for(&pool, &f, stock.id).await, vec![2]);

    let bad_dates = UpdateBatch {
        expiry_date: Some(today - Duration::days(1)),
        ..Default::default()
    };
    let err = batches
        .update(f.tenant.id, stock.id, &bad_dates, today, f.admin.id)
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<BatchDateError>(), Some(&BatchDateError::ExpiryNotInFuture));

    assert!(batches
        .update(f.tenant.id, Uuid::new_v4(), &recount, today, f.admin.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore]
async fn adjustment_never_takes_a_batch_below_zero() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    let batches = BatchRepository::new(pool.clone());
    let stock = batch(&f, "B-ADJ", 120, 5);
    batches.create(&stock, f.admin.id).await.unwrap();

    let damaged = StockAdjustment {
        batch_id: stock.id,
        quantity_change: -3,
        reason: "Damaged strips".to_string(),
    };
    let (adjusted, movement) = batches
        .adjust(f.tenant.id, &damaged, f.admin.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(adjusted.quantity, 2);
    assert_eq!(movement.quantity, -3);
    assert_eq!(movement.movement_type, MovementType::Adjustment);

    let too_many = StockAdjustment {
        quantity_change: -5,
        ..damaged.clone()
    };
    let err = batches.adjust(f.tenant.id, &too_many, f.admin.id).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StockError>(),
        Some(StockError::NegativeQuantity { resulting: -3, .. })
    ));

    let stored = batches.find_by_id(f.tenant.id, stock.id).await.unwrap().unwrap();
    assert_eq!(stored.batch.quantity, 2);
    assert_eq!(adjustments_for(&pool, &f, stock.id).await, vec![-3]);

    let unknown = StockAdjustment {
        batch_id: Uuid::new_v4(),
        ..damaged
    };
    assert!(batches.adjust(f.tenant.id, &unknown, f.admin.id).await.unwrap().is_none());
}

async fn uploaded_prescription(pool: &PostgresPool, f: &Fixture) -> Prescription {
    let request = CreatePrescription {
        patient_name: "Ravi Kumar".to_string(),
        patient_phone: None,
        patient_age: Some(42),
        doctor_name: Some("Dr. Mehta".to_string()),
        notes: None,
        items: Vec::new(),
    };
    let prescription = Prescription::new(f.tenant.id, f.admin.id, &request);
    assert_eq!(prescription.status, PrescriptionStatus::Uploaded);
    PrescriptionRepository::new(pool.clone())
        .create(&prescription, &[])
        .await
        .unwrap();
    prescription
}

#[tokio::test]
#[ignore]
async fn stale_prescription_review_cannot_overwrite_a_decision() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    let prescriptions = PrescriptionRepository::new(pool.clone());
    let created = uploaded_prescription(&pool, &f).await;

    // Two reviewers open the same upload.
    let mut first = prescriptions.find_by_id(f.tenant.id, created.id).await.unwrap().unwrap();
    let mut second = prescriptions.find_by_id(f.tenant.id, created.id).await.unwrap().unwrap();

    first.status = PrescriptionStatus::Validated;
    first.validated_by = Some(f.admin.id);
    assert!(prescriptions
        .update(&first, PrescriptionStatus::Uploaded, None)
        .await
        .unwrap());

    second.status = PrescriptionStatus::Rejected;
    second.validated_by = Some(f.admin.id);
    assert!(!prescriptions
        .update(&second, PrescriptionStatus::Uploaded, None)
        .await
        .unwrap());

    let stored = prescriptions.find_by_id(f.tenant.id, created.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PrescriptionStatus::Validated);
}

#[tokio::test]
#[ignore]
async fn prescription_update_replaces_items_only_when_guard_holds() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    let prescriptions = PrescriptionRepository::new(pool.clone());
    let mut prescription = uploaded_prescription(&pool, &f).await;

    let item = PrescriptionItem {
        id: Uuid::new_v4(),
        prescription_id: prescription.id,
        product_id: Some(f.product.id),
        medicine_name: "Paracetamol 500mg".to_string(),
        dosage: Some("1-0-1".to_string()),
        quantity: Some(10),
        instructions: None,
    };
    prescription.status = PrescriptionStatus::PendingValidation;
    prescription.notes = Some("Checked by counter".to_string());
    assert!(prescriptions
        .update(&prescription, PrescriptionStatus::Uploaded, Some(&[item.clone()]))
        .await
        .unwrap());
    assert_eq!(prescriptions.items(prescription.id).await.unwrap(), vec![item]);

    // Stale expectation: nothing changes, items included.
    assert!(!prescriptions
        .update(&prescription, PrescriptionStatus::Uploaded, Some(&[]))
        .await
        .unwrap());
    assert_eq!(prescriptions.items(prescription.id).await.unwrap().len(), 1);

    let stored = prescriptions.find_by_id(f.tenant.id, prescription.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PrescriptionStatus::PendingValidation);
    assert_eq!(stored.notes.as_deref(), Some("Checked by counter"));
}

#[tokio::test]
#[ignore]
async fn reorder_suggestions_are_replaced_and_closed() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    BatchRepository::new(pool.clone())
        .create(&batch(&f, "B-LOW", 120, 3), f.admin.id)
        .await
        .unwrap();

    let today = Utc::now().date_naive();
    let snapshots = ProductRepository::new(pool.clone())
        .stock_snapshots(f.tenant.id, today, 30)
        .await
        .unwrap();
    let policy = AlertPolicy {
        min_reorder_quantity: 50,
        assumed_daily_usage: 5,
    };
    let suggestions: Vec<ReorderSuggestion> = generate_alerts(&snapshots, &policy)
        .iter()
        .map(|alert| ReorderSuggestion::from_alert(f.tenant.id, alert))
        .collect();
    assert_eq!(suggestions.len(), 1);

    let reorders = ReorderRepository::new(pool.clone());
    reorders.replace_open(f.tenant.id, &suggestions).await.unwrap();
    let fresh: Vec<ReorderSuggestion> = suggestions
        .iter()
        .map(|s| ReorderSuggestion { id: Uuid::new_v4(), ..s.clone() })
        .collect();
    reorders.replace_open(f.tenant.id, &fresh).await.unwrap();

    let open = reorders.list_open(f.tenant.id).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, fresh[0].id);
    assert_eq!(open[0].current_stock, 3);
    assert_eq!(open[0].suggested_quantity, 50);

    assert_eq!(reorders.mark_processed(f.tenant.id, f.product.id).await.unwrap(), 1);
    assert!(reorders.list_open(f.tenant.id).await.unwrap().is_empty());
    assert_eq!(reorders.mark_processed(f.tenant.id, f.product.id).await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn usage_counts_live_rows() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    let tenants = TenantRepository::new(pool.clone());

    let usage = tenants.usage(f.tenant.id, Utc::now()).await.unwrap();
    assert_eq!(usage.admins, 1);
    assert_eq!(usage.pharmacists, 0);
    assert_eq!(usage.products, 1);
    assert_eq!(usage.suppliers, 1);
    assert_eq!(usage.invoices_this_month, 0);

    let pharmacist = User::new(
        f.tenant.id,
        "Neha Iyer".to_string(),
        format!("neha+{}@example.com", Uuid::new_v4()),
        UserRole::Pharmacist,
        "sha256$1$00$00".to_string(),
    );
    UserRepository::new(pool.clone()).create(&pharmacist).await.unwrap();
    BatchRepository::new(pool.clone())
        .create(&batch(&f, "B-USAGE", 120, 10), f.admin.id)
        .await
        .unwrap();
    SaleRepository::new(pool.clone())
        .create(&draft(&f, 1), Utc::now().date_naive())
        .await
        .unwrap();

    let usage = tenants.usage(f.tenant.id, Utc::now()).await.unwrap();
    assert_eq!(usage.pharmacists, 1);
    assert_eq!(usage.invoices_this_month, 1);
}

#[tokio::test]
#[ignore]
async fn tenants_never_see_each_others_stock() {
    let pool = pool().await;
    let ours = fixture(&pool).await;
    let theirs = fixture(&pool).await;
    let batches = BatchRepository::new(pool.clone());
    let products = ProductRepository::new(pool.clone());
    let stock = batch(&ours, "B-OURS", 120, 7);
    batches.create(&stock, ours.admin.id).await.unwrap();

    assert!(products.find_by_id(theirs.tenant.id, ours.product.id).await.unwrap().is_none());
    assert!(batches.find_by_id(theirs.tenant.id, stock.id).await.unwrap().is_none());

    let rename = UpdateBatch {
        batch_number: Some("HIJACKED".to_string()),
        ..Default::default()
    };
    let today = Utc::now().date_naive();
    assert!(batches
        .update(theirs.tenant.id, stock.id, &rename, today, theirs.admin.id)
        .await
        .unwrap()
        .is_none());

    let snapshots = products.stock_snapshots(theirs.tenant.id, today, 30).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].product_id, theirs.product.id);
    assert_eq!(snapshots[0].current_stock, 0);

    let ours_snapshot = products.stock_snapshots(ours.tenant.id, today, 30).await.unwrap();
    assert_eq!(ours_snapshot[0].current_stock, 7);
}

#[tokio::test]
#[ignore]
async fn expiring_stock_includes_units_already_past_expiry() {
    let pool = pool().await;
    let f = fixture(&pool).await;
    let batches = BatchRepository::new(pool.clone());
    batches.create(&batch(&f, "B-EXPIRED", -3, 5), f.admin.id).await.unwrap();
    batches.create(&batch(&f, "B-SOON", 10, 2), f.admin.id).await.unwrap();
    batches.create(&batch(&f, "B-LATER", 200, 40), f.admin.id).await.unwrap();

    let snapshots = ProductRepository::new(pool.clone())
        .stock_snapshots(f.tenant.id, Utc::now().date_naive(), 30)
        .await
        .unwrap();
    assert_eq!(snapshots[0].current_stock, 47);
    assert_eq!(snapshots[0].expiring_soon_stock, 7);
}
