//! Property-based tests for the pharmacy domain models.
//!
//! These cover the arithmetic the API relies on: FEFO allocation, tier
//! limits, alert priority, sale totals and the audit hash chain.

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use uuid::Uuid;

use crate::{
    allocate_fefo, check_limit, compute_totals, generate_alerts, verify_chain, AlertPolicy,
    AlertPriority, AuditAction, AuditEntry, BatchStock, LineAmounts, PageRequest, ProductCategory,
    StockSnapshot, SubscriptionTier,
};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

prop_compose! {
    fn arb_uuid()(bytes in prop::array::uniform16(0u8..)) -> Uuid {
        Uuid::from_bytes(bytes)
    }
}

prop_compose! {
    fn arb_batch_stock()(
        batch_id in arb_uuid(),
        quantity in 0i32..200,
        expiry_offset in -30i64..400,
        price_cents in 1u32..100_000,
    ) -> BatchStock {
        BatchStock {
            batch_id,
            expiry_date: today() + Duration::days(expiry_offset),
            quantity,
            selling_price: f64::from(price_cents) / 100.0,
        }
    }
}

prop_compose! {
    fn arb_snapshot()(
        product_id in arb_uuid(),
        product_name in "[A-Z][a-z]{3,12}",
        reorder_level in 0i32..500,
        current_stock in 0i64..1000,
    ) -> StockSnapshot {
        StockSnapshot {
            product_id,
            sku: format!("SKU-{}", product_name.to_uppercase()),
            product_name,
            category: ProductCategory::Otc,
            unit: "strip".to_string(),
            reorder_level,
            current_stock,
            expiring_soon_stock: 0,
        }
    }
}

fn arb_tier() -> impl Strategy<Value = SubscriptionTier> {
    prop::sample::select(SubscriptionTier::ALL.to_vec())
}

proptest! {
    #[test]
    fn fefo_allocates_exactly_the_requested_quantity(
        batches in prop::collection::vec(arb_batch_stock(), 0..12),
        quantity in 1i32..500,
    ) {
        let usable: i64 = batches
            .iter()
            .filter(|b| b.expiry_date >= today())
            .map(|b| i64::from(b.quantity))
            .sum();

        match allocate_fefo(&batches, quantity, today()) {
            Ok(allocations) => {
                let drawn: i32 = allocations.iter().map(|a| a.quantity).sum();
                prop_assert_eq!(drawn, quantity);
                prop_assert!(allocations.iter().all(|a| a.quantity > 0));
            }
            Err(err) => {
                prop_assert!(usable < i64::from(quantity));
                prop_assert_eq!(err.available, usable);
            }
        }
    }

    #[test]
    fn fefo_never_draws_from_expired_batches_and_respects_expiry_order(
        batches in prop::collection::vec(arb_batch_stock(), 1..12),
        quantity in 1i32..300,
    ) {
        if let Ok(allocations) = allocate_fefo(&batches, quantity, today()) {
            let expiry_of = |id: Uuid| {
                batches.iter().find(|b| b.batch_id == id).map(|b| b.expiry_date)
            };
            let expiries: Vec<NaiveDate> =
                allocations.iter().filter_map(|a| expiry_of(a.batch_id)).collect();
            prop_assert!(expiries.iter().all(|d| *d >= today()));
            prop_assert!(expiries.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn tier_limit_allows_only_below_limit(tier in arb_tier(), current in 0i64..2000) {
        let limit = tier.limits().max_products;
        let allowed = check_limit(limit, current).is_ok();
        match limit {
            None => prop_assert!(allowed),
            Some(max) => prop_assert_eq!(allowed, current < max),
        }
    }

    #[test]
    fn every_tier_feature_is_available_on_enterprise(tier in arb_tier()) {
        for feature in tier.features() {
            prop_assert!(SubscriptionTier::Enterprise.has_feature(feature));
        }
    }

    #[test]
    fn alerts_are_exactly_the_products_at_or_below_reorder_level(
        snapshots in prop::collection::vec(arb_snapshot(), 0..20),
    ) {
        let alerts = generate_alerts(&snapshots, &AlertPolicy::default());
        let expected = snapshots
            .iter()
            .filter(|s| s.current_stock <= i64::from(s.reorder_level))
            .count();
        prop_assert_eq!(alerts.len(), expected);
        prop_assert!(alerts.windows(2).all(|w| w[0].priority >= w[1].priority));
        prop_assert!(alerts.iter().all(|a| a.suggested_quantity >= 50));
    }

    #[test]
    fn out_of_stock_is_always_high_priority(reorder_level in 0i32..1000) {
        prop_assert_eq!(AlertPriority::classify(0, reorder_level), AlertPriority::High);
    }

    #[test]
    fn sale_total_is_gross_minus_discount(
        lines in prop::collection::vec((1u32..50_000, 1i32..50, prop::sample::select(vec![0.0, 5.0, 12.0, 18.0])), 1..8),
        discount_ratio in 0.0f64..1.0,
    ) {
        let amounts: Vec<LineAmounts> = lines
            .iter()
            .map(|(cents, qty, gst)| LineAmounts::compute(f64::from(*cents) / 100.0, *qty, *gst))
            .collect();
        let gross: f64 = amounts.iter().map(|l| l.subtotal + l.gst_amount).sum();
        let discount = (gross * discount_ratio * 100.0).floor() / 100.0;

        let totals = compute_totals(&amounts, discount).unwrap();
        prop_assert!(totals.total_amount >= 0.0);
        let expected = totals.subtotal + totals.gst_amount - totals.discount;
        prop_assert!((totals.total_amount - expected).abs() < 0.011);
    }

    #[test]
    fn page_request_is_always_clamped(page in any::<Option<i64>>(), limit in any::<Option<i64>>()) {
        let request = PageRequest::new(page, limit, 20);
        prop_assert!(request.page >= 1);
        prop_assert!((1..=100).contains(&request.limit));
        prop_assert!(request.offset() >= 0);
    }

    #[test]
    fn audit_chain_detects_any_single_tampered_entry(len in 1usize..10, victim in 0usize..10) {
        let tenant = Uuid::new_v4();
        let mut entries: Vec<AuditEntry> = Vec::new();
        for i in 0..len {
            let prev = entries.last().map(|e| e.hash.clone());
            entries.push(
                AuditEntry::new(
                    tenant,
                    AuditAction::SaleCreated,
                    "sale",
                    Uuid::new_v4(),
                    None,
                    serde_json::json!({ "sequence": i }),
                )
                .chained_after(prev),
            );
        }
        prop_assert!(verify_chain(&entries).is_valid);

        let victim = victim % len;
        entries[victim].entity_type = "tampered".to_string();
        let result = verify_chain(&entries);
        prop_assert!(!result.is_valid);
        prop_assert!(result.broken_links.contains(&entries[victim].id));
    }
}
