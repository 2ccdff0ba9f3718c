use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Append-only record of a compliance-relevant action. Entries of one tenant
/// form a hash chain: each hash covers the previous entry's hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub user_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub hash: String,
    pub previous_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    PrescriptionValidated,
    PrescriptionRejected,
    SaleCreated,
    SaleCancelled,
    StockAdjusted,
    BatchDeleted,
    ProductDeleted,
    UserRoleChanged,
    UserDeactivated,
    SubscriptionChanged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrescriptionValidated => "PRESCRIPTION_VALIDATED",
            Self::PrescriptionRejected => "PRESCRIPTION_REJECTED",
            Self::SaleCreated => "SALE_CREATED",
            Self::SaleCancelled => "SALE_CANCELLED",
            Self::StockAdjusted => "STOCK_ADJUSTED",
            Self::BatchDeleted => "BATCH_DELETED",
            Self::ProductDeleted => "PRODUCT_DELETED",
            Self::UserRoleChanged => "USER_ROLE_CHANGED",
            Self::UserDeactivated => "USER_DEACTIVATED",
            Self::SubscriptionChanged => "SUBSCRIPTION_CHANGED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        [
            Self::PrescriptionValidated,
            Self::PrescriptionRejected,
            Self::SaleCreated,
            Self::SaleCancelled,
            Self::StockAdjusted,
            Self::BatchDeleted,
            Self::ProductDeleted,
            Self::UserRoleChanged,
            Self::UserDeactivated,
            Self::SubscriptionChanged,
        ]
        .into_iter()
        .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl AuditEntry {
    pub fn new(
        tenant_id: Uuid,
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: Uuid,
        user_id: Option<Uuid>,
        details: serde_json::Value,
    ) -> Self {
        // Postgres keeps microseconds; hash what will be read back.
        let timestamp = Utc::now().trunc_subsecs(6);
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            timestamp,
            action,
            entity_type: entity_type.into(),
            entity_id,
            user_id,
            details,
            hash: String::new(),
            previous_hash: None,
        }
    }

    /// Links this entry after `previous_hash` and seals it.
    pub fn chained_after(mut self, previous_hash: Option<String>) -> Self {
        self.previous_hash = previous_hash;
        self.hash = self.calculate_hash();
        self
    }

    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.to_string().as_bytes());
        hasher.update(self.tenant_id.to_string().as_bytes());
        hasher.update(
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true)
                .as_bytes(),
        );
        hasher.update(self.action.as_str().as_bytes());
        hasher.update(self.entity_type.as_bytes());
        hasher.update(self.entity_id.to_string().as_bytes());
        if let Some(user_id) = self.user_id {
            hasher.update(user_id.to_string().as_bytes());
        }
        hasher.update(self.details.to_string().as_bytes());
        if let Some(prev) = &self.previous_hash {
            hasher.update(prev.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    pub fn verify_integrity(&self) -> bool {
        self.calculate_hash() == self.hash
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainVerification {
    pub is_valid: bool,
    pub entries_verified: usize,
    pub broken_links: Vec<Uuid>,
}

/// Walks entries in chain order. An entry is broken when its own hash does
/// not match its content or its `previous_hash` does not match the entry before it.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
    let mut broken_links = Vec::new();
    let mut previous: Option<&str> = None;

    for entry in entries {
        let linked = entry.previous_hash.as_deref() == previous;
        if !linked || !entry.verify_integrity() {
            broken_links.push(entry.id);
        }
        previous = Some(entry.hash.as_str());
    }

    ChainVerification {
        is_valid: broken_links.is_empty(),
        entries_verified: entries.len(),
        broken_links,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(len: usize) -> Vec<AuditEntry> {
        let tenant = Uuid::new_v4();
        let mut entries: Vec<AuditEntry> = Vec::new();
        for i in 0..len {
            let prev = entries.last().map(|e| e.hash.clone());
            let entry = AuditEntry::new(
                tenant,
                AuditAction::StockAdjusted,
                "batch",
                Uuid::new_v4(),
                None,
                json!({ "quantity_change": i }),
            )
            .chained_after(prev);
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn test_intact_chain_verifies() {
        let entries = chain(5);
        let result = verify_chain(&entries);
        assert!(result.is_valid);
        assert_eq!(result.entries_verified, 5);
    }

    #[test]
    fn test_tampered_details_break_chain() {
        let mut entries = chain(3);
        entries[1].details = json!({ "quantity_change": 999 });
        let result = verify_chain(&entries);
        assert!(!result.is_valid);
        assert_eq!(result.broken_links, vec![entries[1].id]);
    }

    #[test]
    fn test_removed_entry_breaks_link() {
        let mut entries = chain(3);
        entries.remove(1);
        let result = verify_chain(&entries);
        assert_eq!(result.broken_links, vec![entries[1].id]);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(AuditAction::from_str("sale_created"), Some(AuditAction::SaleCreated));
        assert_eq!(AuditAction::from_str("nope"), None);
    }
}
