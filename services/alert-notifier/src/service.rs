//! Notifier Service
//!
//! One notification cycle: refresh reorder suggestions for every active
//! tenant entitled to notifications and mail a digest to its administrators.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use pharmy_database::{BatchRepository, PostgresPool, ProductRepository, ReorderRepository, TenantRepository, UserRepository};
use pharmy_models::{generate_alerts, AlertPolicy, Feature, ReorderSuggestion, Tenant};
use pharmy_utils::mailer::{Mailer, SmtpClient};
use pharmy_utils::AppConfig;

use crate::digest::build_digest;
use crate::template_engine::{TemplateEngine, LOW_STOCK_DIGEST};

/// Outcome of one pass over all tenants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub tenants_checked: usize,
    pub tenants_skipped: usize,
    pub digests_sent: usize,
    pub emails_sent: usize,
    pub failures: usize,
}

/// What `/health` reports about the scheduler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotifierStatus {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub cycles_completed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
}

pub type SharedStatus = Arc<RwLock<NotifierStatus>>;

/// Per-tenant outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TenantOutcome {
    NothingToReport,
    NoRecipients,
    Sent { emails: usize },
}

/// Notifier service
#[derive(Clone)]
pub struct NotifierService {
    pool: PostgresPool,
    mailer: Arc<dyn Mailer>,
    templates: Arc<TemplateEngine>,
    config: Arc<AppConfig>,
}

impl NotifierService {
    pub fn new(pool: PostgresPool, config: Arc<AppConfig>) -> Result<Self> {
        Ok(Self {
            pool,
            mailer: Arc::new(SmtpClient::from_config(&config.email)?),
            templates: Arc::new(TemplateEngine::new()?),
            config,
        })
    }

    fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            min_reorder_quantity: self.config.inventory.min_reorder_quantity,
            assumed_daily_usage: self.config.inventory.assumed_daily_usage,
        }
    }

    /// Runs one cycle. Only listing the tenants can fail the whole cycle;
    /// per-tenant errors are logged and counted.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let now = Utc::now();
        let tenants = TenantRepository::new(self.pool.clone()).list_active().await?;
        let mut report = CycleReport::default();

        for tenant in tenants {
            if !wants_notifications(&tenant, now) {
                debug!(tenant_id = %tenant.id, "Notifications not included in plan");
                report.tenants_skipped += 1;
                continue;
            }
            report.tenants_checked += 1;

            match self.process_tenant(&tenant, now).await {
                Ok(TenantOutcome::Sent { emails }) => {
                    report.digests_sent += 1;
                    report.emails_sent += emails;
                }
                Ok(TenantOutcome::NoRecipients) => {
                    warn!(tenant_id = %tenant.id, "Digest pending but tenant has no active administrators");
                }
                Ok(TenantOutcome::NothingToReport) => {}
                Err(e) => {
                    error!(tenant_id = %tenant.id, error = %e, "Notification cycle failed for tenant");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    async fn process_tenant(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<TenantOutcome> {
        let today = now.date_naive();
        let warning_days = self.config.inventory.expiry_warning_days;

        let snapshots = ProductRepository::new(self.pool.clone())
            .stock_snapshots(tenant.id, today, warning_days)
            .await?;
        let alerts = generate_alerts(&snapshots, &self.alert_policy());

        let suggestions: Vec<ReorderSuggestion> = alerts
            .iter()
            .map(|alert| ReorderSuggestion::from_alert(tenant.id, alert))
            .collect();
        ReorderRepository::new(self.pool.clone())
            .replace_open(tenant.id, &suggestions)
            .await?;

        let expiring = BatchRepository::new(self.pool.clone())
            .expiring(tenant.id, today, today + Duration::days(warning_days), None)
            .await?;

        let digest = match build_digest(tenant, &alerts, &expiring, today, warning_days, now) {
            Some(digest) => digest,
            None => return Ok(TenantOutcome::NothingToReport),
        };

        let admins = UserRepository::new(self.pool.clone())
            .list_active_admins(tenant.id)
            .await?;
        if admins.is_empty() {
            return Ok(TenantOutcome::NoRecipients);
        }

        let email = self.templates.render(LOW_STOCK_DIGEST, &digest)?;
        let mut sent = 0;
        for admin in &admins {
            match self.mailer.send(&admin.name, &admin.email, &email).await {
                Ok(_) => sent += 1,
                Err(e) => warn!(
                    tenant_id = %tenant.id,
                    user_id = %admin.id,
                    error = %e,
                    "Failed to deliver low-stock digest"
                ),
            }
        }
        if sent == 0 {
            anyhow::bail!("No digest could be delivered to {} administrators", admins.len());
        }

        info!(
            tenant_id = %tenant.id,
            alerts = digest.summary.total_alerts,
            expiring = digest.expiring_count,
            recipients = sent,
            "Low-stock digest sent"
        );
        Ok(TenantOutcome::Sent { emails: sent })
    }
}

fn wants_notifications(tenant: &Tenant, now: DateTime<Utc>) -> bool {
    tenant.is_active && tenant.effective_tier(now).has_feature(Feature::Notifications)
}

/// Ticks every `interval_minutes` and records each cycle in `status`.
/// The first cycle runs immediately.
pub async fn run_scheduler(service: NotifierService, status: SharedStatus, interval_minutes: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_minutes.max(1) * 60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let started = Utc::now();
        let result = service.run_cycle().await;

        let mut status = status.write().await;
        status.cycles_completed += 1;
        status.last_run_at = Some(started);
        match result {
            Ok(report) => {
                info!(
                    checked = report.tenants_checked,
                    skipped = report.tenants_skipped,
                    digests = report.digests_sent,
                    emails = report.emails_sent,
                    failures = report.failures,
                    "Notification cycle complete"
                );
                status.last_report = Some(report);
                status.last_error = None;
            }
            Err(e) => {
                error!(error = %e, "Notification cycle aborted");
                status.last_error = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmy_models::SubscriptionTier;

    #[test]
    fn test_every_tier_gets_notifications() {
        let now = Utc::now();
        for tier in [
            SubscriptionTier::Community,
            SubscriptionTier::Basic,
            SubscriptionTier::Pro,
            SubscriptionTier::Enterprise,
        ] {
            let mut tenant = Tenant::new("Green Cross Pharmacy".to_string());
            tenant.tier = tier;
            assert!(wants_notifications(&tenant, now));
        }
    }

    #[test]
    fn test_inactive_tenant_is_skipped() {
        let mut tenant = Tenant::new("Green Cross Pharmacy".to_string());
        tenant.is_active = false;
        assert!(!wants_notifications(&tenant, Utc::now()));
    }

    #[tokio::test]
    async fn test_status_starts_empty() {
        let status: SharedStatus = Arc::new(RwLock::new(NotifierStatus {
            enabled: true,
            interval_minutes: 60,
            ..Default::default()
        }));
        let snapshot = status.read().await.clone();
        assert_eq!(snapshot.cycles_completed, 0);
        assert!(snapshot.last_report.is_none());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["interval_minutes"], 60);
        assert!(json["last_run_at"].is_null());
    }
}
