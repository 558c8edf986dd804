//! Inventory ledger records and alerts.
//!
//! Stock is never stored as a counter: the current level for a
//! (product, variant) pair is the running sum of all change deltas for that
//! key. Change records are append-only and carry an idempotency key so a
//! redelivered event can be recognized and skipped instead of applied twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    OrderCreated,
    Restock,
    Adjustment,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OrderCreated => "order-created",
            Self::Restock => "restock",
            Self::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryChange {
    pub id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub change_type: ChangeType,
    pub quantity_delta: i64,
    pub reason: String,
    pub reference_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl InventoryChange {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        product_id: impl Into<String>,
        variant_id: Option<String>,
        change_type: ChangeType,
        quantity_delta: i64,
        reason: impl Into<String>,
        reference_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            variant_id,
            change_type,
            quantity_delta,
            reason: reason.into(),
            reference_id: reference_id.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Idempotency key: a second record with the same key is a redelivery
    /// and must be skipped.
    pub fn key(&self) -> ChangeKey {
        ChangeKey {
            reference_id: self.reference_id.clone(),
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
            change_type: self.change_type,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChangeKey {
    pub reference_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub change_type: ChangeType,
}

/// An alert covers its threshold crossing while `Open` or `Notified`; it is
/// marked `Resolved` once stock recovers above the threshold, after which a
/// new crossing raises a fresh alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Notified,
    Resolved,
}

impl AlertStatus {
    pub fn covers_crossing(self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryAlert {
    pub id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub current_stock: i64,
    pub threshold: i64,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
}

impl InventoryAlert {
    pub fn for_stock_level(
        product_id: impl Into<String>,
        variant_id: Option<String>,
        current_stock: i64,
        threshold: i64,
    ) -> Self {
        let (alert_type, severity) = if current_stock <= 0 {
            ("out-of-stock", AlertSeverity::Critical)
        } else {
            ("low-stock", AlertSeverity::Warning)
        };
        Self {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            variant_id,
            alert_type: alert_type.to_string(),
            severity,
            current_stock,
            threshold,
            status: AlertStatus::Open,
            created_at: Utc::now(),
            notified_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_keys_for_redelivered_change() {
        let a = InventoryChange::new("P1", None, ChangeType::OrderCreated, -2, "r", "O1", "U1");
        let b = InventoryChange::new("P1", None, ChangeType::OrderCreated, -2, "r", "O1", "U1");
        assert_ne!(a.id, b.id);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn different_variant_is_a_different_key() {
        let a = InventoryChange::new("P1", None, ChangeType::OrderCreated, -2, "r", "O1", "U1");
        let b = InventoryChange::new(
            "P1",
            Some("V1".into()),
            ChangeType::OrderCreated,
            -2,
            "r",
            "O1",
            "U1",
        );
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn alert_severity_follows_stock_level() {
        let low = InventoryAlert::for_stock_level("P1", None, 3, 10);
        assert_eq!(low.alert_type, "low-stock");
        assert_eq!(low.severity, AlertSeverity::Warning);
        assert_eq!(low.status, AlertStatus::Open);

        let out = InventoryAlert::for_stock_level("P1", None, 0, 10);
        assert_eq!(out.alert_type, "out-of-stock");
        assert_eq!(out.severity, AlertSeverity::Critical);
    }
}
