use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers::*, AppState};

pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .route("/health/detailed", get(health::detailed_health_check))
        .nest("/auth", auth_routes())
        .nest("/users", user_routes())
        .route(
            "/tenant",
            get(subscription::get_tenant).put(subscription::update_tenant),
        )
        .nest("/subscription", subscription_routes())
        .nest("/products", product_routes())
        .nest("/suppliers", supplier_routes())
        .nest("/batches", batch_routes())
        .nest("/inventory", inventory_routes())
        .nest("/alerts", alert_routes())
        .nest("/prescriptions", prescription_routes())
        .nest("/sales", sale_routes())
        .nest("/reports", report_routes())
        .nest("/audit", audit_routes())
        .route("/uploads/profile-image", post(users::upload_profile_image))
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password))
        .route("/change-password", post(auth::change_password))
        .route("/me", get(auth::me))
        .route("/session", get(auth::session))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/profile", get(users::get_profile).put(users::update_profile))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
}

fn subscription_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(subscription::get_subscription).put(subscription::change_subscription),
        )
        .route("/plans", get(subscription::list_plans))
}

fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(products::list_products).post(products::create_product))
        .route("/search", get(products::search_products))
        .route(
            "/barcode",
            get(products::find_by_barcode).post(products::assign_barcode),
        )
        .route(
            "/:id",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
}

fn supplier_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(suppliers::list_suppliers).post(suppliers::create_supplier))
        .route(
            "/:id",
            get(suppliers::get_supplier)
                .put(suppliers::update_supplier)
                .delete(suppliers::delete_supplier),
        )
}

fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(batches::list_batches).post(batches::create_batch))
        .route(
            "/:id",
            get(batches::get_batch)
                .put(batches::update_batch)
                .delete(batches::delete_batch),
        )
}

fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/stock", get(inventory::stock_summary))
        .route("/movements", get(inventory::list_movements))
        .route("/expiring", get(inventory::expiring_batches))
        .route("/adjustments", post(inventory::adjust_stock))
}

fn alert_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/low-stock",
            get(alerts::low_stock_alerts).post(alerts::update_alert),
        )
        .route("/reorder-suggestions", get(alerts::reorder_suggestions))
}

fn prescription_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(prescriptions::list_prescriptions).post(prescriptions::create_prescription),
        )
        .route("/upload", post(prescriptions::upload_prescription))
        .route(
            "/:id",
            get(prescriptions::get_prescription)
                .put(prescriptions::update_prescription)
                .delete(prescriptions::delete_prescription),
        )
}

fn sale_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(sales::list_sales).post(sales::create_sale))
        .route("/:id", get(sales::get_sale))
        .route("/:id/cancel", post(sales::cancel_sale))
}

fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(reports::dashboard))
        .route("/sales", get(reports::sales_report))
}

fn audit_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(audit::list_audit_entries))
        .route("/verify", post(audit::verify_audit_chain))
}
