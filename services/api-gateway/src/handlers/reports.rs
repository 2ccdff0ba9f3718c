//! Reporting Handlers

use axum::{
    extract::{Query, State},
    response::Json,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pharmy_database::{
    month_start, BatchRepository, DailySales, ProductRepository, RecentPrescription, ReportRepository, TopProduct,
};
use pharmy_models::{round2, Feature};
use pharmy_utils::{start_of_day, PharmyError, PharmyResult};

use super::batches::BatchResponse;
use super::inventory::LowStockProduct;
use crate::middleware::{load_tenant, AuthUser};
use crate::AppState;

const DASHBOARD_LIST_SIZE: usize = 5;
const DEFAULT_REPORT_DAYS: i64 = 30;
const MAX_REPORT_DAYS: i64 = 366;

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub revenue: RevenueStats,
    pub orders: OrderStats,
    pub low_stock: LowStockStats,
    pub expiring: ExpiringStats,
    pub recent_prescriptions: Vec<RecentPrescription>,
    pub top_products: Vec<TopProduct>,
    pub summary: DashboardSummary,
}

#[derive(Debug, Serialize)]
pub struct RevenueStats {
    pub this_month: f64,
    pub last_month: f64,
    pub change_percent: f64,
    pub trend: Trend,
}

#[derive(Debug, Serialize)]
pub struct OrderStats {
    pub today: i64,
    pub yesterday: i64,
    pub change_percent: f64,
    pub trend: Trend,
}

#[derive(Debug, Serialize)]
pub struct LowStockStats {
    pub count: usize,
    pub items: Vec<LowStockProduct>,
}

#[derive(Debug, Serialize)]
pub struct ExpiringStats {
    pub units: i64,
    pub batches: Vec<BatchResponse>,
}

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    pub total_products: usize,
    pub total_prescriptions: i64,
    pub completed_sales_this_month: i64,
    pub pending_prescriptions: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
}

#[derive(Debug, Deserialize)]
pub struct SalesReportQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct SalesReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub days: Vec<DailySales>,
    pub total_orders: i64,
    pub total_revenue: f64,
    pub total_gst: f64,
    pub total_discount: f64,
}

/// GET /api/v1/reports/dashboard
pub async fn dashboard(State(state): State<AppState>, caller: AuthUser) -> PharmyResult<Json<Dashboard>> {
    let now = Utc::now();
    let today = state.today();
    let warning_days = state.warning_days();
    let reports = ReportRepository::new(state.pool.clone());

    let this_month_start = month_start(now);
    let last_month_start = month_start(this_month_start - Duration::days(1));
    let tomorrow = start_of_day(today + Duration::days(1));
    let today_start = start_of_day(today);
    let yesterday_start = start_of_day(today - Duration::days(1));

    let this_month = reports
        .sales_between(caller.tenant_id, this_month_start, tomorrow)
        .await?;
    let last_month = reports
        .sales_between(caller.tenant_id, last_month_start, this_month_start)
        .await?;
    let orders_today = reports.sales_between(caller.tenant_id, today_start, tomorrow).await?;
    let orders_yesterday = reports
        .sales_between(caller.tenant_id, yesterday_start, today_start)
        .await?;

    let snapshots = ProductRepository::new(state.pool.clone())
        .stock_snapshots(caller.tenant_id, today, warning_days)
        .await?;
    let mut low: Vec<_> = snapshots
        .iter()
        .filter(|s| s.current_stock <= i64::from(s.reorder_level))
        .collect();
    low.sort_by(|a, b| {
        a.current_stock
            .cmp(&b.current_stock)
            .then_with(|| a.product_name.cmp(&b.product_name))
    });

    let expiring = BatchRepository::new(state.pool.clone())
        .expiring(caller.tenant_id, today, today + Duration::days(warning_days), None)
        .await?;
    let expiring_units: i64 = expiring.iter().map(|l| i64::from(l.batch.quantity)).sum();

    let recent_prescriptions = reports
        .recent_prescriptions(caller.tenant_id, DASHBOARD_LIST_SIZE as i64)
        .await?;
    let top_products = reports
        .top_products(caller.tenant_id, this_month_start, DASHBOARD_LIST_SIZE as i64)
        .await?;
    let prescription_counts = reports.prescription_counts(caller.tenant_id).await?;

    let revenue_change = change_percent(this_month.revenue, last_month.revenue);
    let order_change = change_percent(orders_today.orders as f64, orders_yesterday.orders as f64);

    Ok(Json(Dashboard {
        revenue: RevenueStats {
            this_month: round2(this_month.revenue),
            last_month: round2(last_month.revenue),
            change_percent: revenue_change,
            trend: trend(revenue_change),
        },
        orders: OrderStats {
            today: orders_today.orders,
            yesterday: orders_yesterday.orders,
            change_percent: order_change,
            trend: trend(order_change),
        },
        low_stock: LowStockStats {
            count: low.len(),
            items: low
                .into_iter()
                .take(DASHBOARD_LIST_SIZE)
                .map(|s| LowStockProduct {
                    product_id: s.product_id,
                    name: s.product_name.clone(),
                    sku: s.sku.clone(),
                    current_stock: s.current_stock,
                    reorder_level: s.reorder_level,
                })
                .collect(),
        },
        expiring: ExpiringStats {
            units: expiring_units,
            batches: expiring
                .into_iter()
                .take(DASHBOARD_LIST_SIZE)
                .map(|listing| BatchResponse::from_listing(&state, listing))
                .collect(),
        },
        recent_prescriptions,
        top_products,
        summary: DashboardSummary {
            total_products: snapshots.len(),
            total_prescriptions: prescription_counts.total,
            completed_sales_this_month: this_month.orders,
            pending_prescriptions: prescription_counts.pending,
        },
    }))
}

/// Daily totals of completed sales. Defaults to the last 30 days.
///
/// GET /api/v1/reports/sales
pub async fn sales_report(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<SalesReportQuery>,
) -> PharmyResult<Json<SalesReport>> {
    let today = state.today();
    let to = query.to.unwrap_or(today);
    let from = query.from.unwrap_or(to - Duration::days(DEFAULT_REPORT_DAYS - 1));
    if from > to {
        return Err(PharmyError::validation("from", "Start date must not be after end date"));
    }
    if (to - from).num_days() >= MAX_REPORT_DAYS {
        return Err(PharmyError::validation(
            "to",
            format!("Reports cover at most {} days", MAX_REPORT_DAYS),
        ));
    }

    load_tenant(&state, &caller)
        .await?
        .require_feature(Feature::AdvancedReports)?;

    let days = ReportRepository::new(state.pool.clone())
        .daily_sales(caller.tenant_id, from, to)
        .await?;

    Ok(Json(SalesReport {
        from,
        to,
        total_orders: days.iter().map(|d| d.orders).sum(),
        total_revenue: round2(days.iter().map(|d| d.revenue).sum()),
        total_gst: round2(days.iter().map(|d| d.gst_amount).sum()),
        total_discount: round2(days.iter().map(|d| d.discount).sum()),
        days,
    }))
}

/// Percentage change from `previous` to `current`, 0 when there is no baseline.
fn change_percent(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    round2((current - previous) / previous * 100.0)
}

fn trend(change: f64) -> Trend {
    if change >= 0.0 {
        Trend::Up
    } else {
        Trend::Down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_percent() {
        assert_eq!(change_percent(150.0, 100.0), 50.0);
        assert_eq!(change_percent(50.0, 200.0), -75.0);
        assert_eq!(change_percent(10.0, 3.0), 233.33);
        assert_eq!(change_percent(500.0, 0.0), 0.0);
    }

    #[test]
    fn test_trend_is_up_for_flat_change() {
        assert_eq!(trend(0.0), Trend::Up);
        assert_eq!(trend(12.5), Trend::Up);
        assert_eq!(trend(-0.01), Trend::Down);
        assert_eq!(serde_json::to_value(Trend::Down).unwrap(), "down");
    }
}
