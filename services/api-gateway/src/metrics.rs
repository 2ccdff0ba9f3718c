//! Prometheus counters exposed on `/metrics`.

use anyhow::{Context, Result};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub sales_completed: IntCounter,
    pub login_failures: IntCounter,
    pub limit_rejections: IntCounterVec,
}

impl Metrics {
    pub fn new(namespace: &str) -> Result<Self> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by method and status").namespace(namespace),
            &["method", "status"],
        )?;
        let sales_completed = IntCounter::with_opts(
            Opts::new("sales_completed_total", "Completed sales").namespace(namespace),
        )?;
        let login_failures = IntCounter::with_opts(
            Opts::new("login_failures_total", "Rejected login attempts").namespace(namespace),
        )?;
        let limit_rejections = IntCounterVec::new(
            Opts::new("limit_rejections_total", "Requests refused by a subscription limit")
                .namespace(namespace),
            &["resource"],
        )?;

        registry
            .register(Box::new(http_requests.clone()))
            .context("Failed to register http_requests_total")?;
        registry
            .register(Box::new(sales_completed.clone()))
            .context("Failed to register sales_completed_total")?;
        registry
            .register(Box::new(login_failures.clone()))
            .context("Failed to register login_failures_total")?;
        registry
            .register(Box::new(limit_rejections.clone()))
            .context("Failed to register limit_rejections_total")?;

        Ok(Self {
            registry,
            http_requests,
            sales_completed,
            login_failures,
            limit_rejections,
        })
    }

    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .context("Failed to encode metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_namespaced() {
        let metrics = Metrics::new("pharmy").unwrap();
        metrics.http_requests.with_label_values(&["GET", "200"]).inc();
        metrics.limit_rejections.with_label_values(&["products"]).inc();
        metrics.sales_completed.inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("pharmy_http_requests_total"));
        assert!(text.contains("pharmy_limit_rejections_total{resource=\"products\"} 1"));
        assert!(text.contains("pharmy_sales_completed_total 1"));
    }
}
