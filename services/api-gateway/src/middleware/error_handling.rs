use axum::{
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::AppState;

/// Counts every response and logs failures: 5xx at error, 4xx at debug.
pub async fn error_handling_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let status = response.status();

    state
        .metrics
        .http_requests
        .with_label_values(&[method.as_str(), status.as_str()])
        .inc();

    if status.is_server_error() {
        tracing::error!(%method, %path, status = status.as_u16(), "Request failed");
    } else if status.is_client_error() {
        tracing::debug!(%method, %path, status = status.as_u16(), "Request rejected");
    }

    response
}
