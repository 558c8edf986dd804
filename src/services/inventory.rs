//! Inventory service: the append-only ledger, the idempotent order-created
//! application, and the periodic threshold scan that raises alerts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::inventory::{ChangeType, InventoryAlert, InventoryChange};
use crate::error::Result;
use crate::messaging::bus::MessageBus;
use crate::messaging::envelope::{Envelope, EventPayload, InventoryChanged, OrderCreated};
use crate::store::InventoryStore;

/// Best-effort "alert raised" callback. A notification failure never rolls
/// back the persisted alert; the alert simply stays open and the next scan
/// retries it.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &InventoryAlert) -> Result<()>;
}

/// Default notifier: writes the alert to the structured log.
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(&self, alert: &InventoryAlert) -> Result<()> {
        tracing::warn!(
            product_id = %alert.product_id,
            variant_id = ?alert.variant_id,
            alert_type = %alert.alert_type,
            current_stock = alert.current_stock,
            threshold = alert.threshold,
            "inventory alert raised"
        );
        Ok(())
    }
}

/// Per-product thresholds with a global default.
#[derive(Clone, Debug)]
pub struct AlertThresholds {
    pub default: i64,
    pub overrides: HashMap<String, i64>,
}

impl AlertThresholds {
    pub fn uniform(default: i64) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    fn for_product(&self, product_id: &str) -> i64 {
        self.overrides.get(product_id).copied().unwrap_or(self.default)
    }
}

#[derive(Clone, Debug)]
pub struct NewChange {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub change_type: ChangeType,
    pub quantity_delta: i64,
    pub reason: String,
    pub reference_id: String,
    pub user_id: String,
}

pub struct InventoryService {
    store: Arc<dyn InventoryStore>,
    bus: Arc<dyn MessageBus>,
    service_name: String,
    thresholds: AlertThresholds,
    notifier: Arc<dyn AlertNotifier>,
}

impl InventoryService {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        bus: Arc<dyn MessageBus>,
        service_name: &str,
        thresholds: AlertThresholds,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            store,
            bus,
            service_name: service_name.to_string(),
            thresholds,
            notifier,
        }
    }

    /// Appends a ledger record unless its idempotency key already exists.
    /// Returns whether the change was applied.
    pub async fn record_change(&self, new_change: NewChange) -> Result<bool> {
        let change = InventoryChange::new(
            new_change.product_id,
            new_change.variant_id,
            new_change.change_type,
            new_change.quantity_delta,
            new_change.reason,
            new_change.reference_id,
            new_change.user_id,
        );
        let applied = self.store.append_change(change.clone()).await?;
        if !applied {
            tracing::debug!(
                product_id = %change.product_id,
                reference_id = %change.reference_id,
                "duplicate inventory change skipped"
            );
            return Ok(false);
        }

        let envelope = Envelope::new(
            &self.service_name,
            EventPayload::InventoryChanged(InventoryChanged {
                product_id: change.product_id.clone(),
                variant_id: change.variant_id.clone(),
                quantity_delta: change.quantity_delta,
                change_type: change.change_type.to_string(),
                reference_id: change.reference_id.clone(),
            }),
        );
        // The ledger record stays even if the announce fails: the caller
        // sees a retryable error and a retry is absorbed by the key check.
        self.bus.publish_event(&envelope).await?;
        tracing::info!(
            product_id = %change.product_id,
            delta = change.quantity_delta,
            reference_id = %change.reference_id,
            "inventory change recorded"
        );
        Ok(true)
    }

    /// Applies an order-created event: one negative delta per line item,
    /// keyed by the order id so redelivery cannot decrement twice.
    pub async fn apply_order_created(&self, event: &OrderCreated) -> Result<()> {
        for item in &event.items {
            self.record_change(NewChange {
                product_id: item.product_id.clone(),
                variant_id: item.variant_id.clone(),
                change_type: ChangeType::OrderCreated,
                quantity_delta: -i64::from(item.quantity),
                reason: format!("order {} created", event.order_number),
                reference_id: event.order_id.clone(),
                user_id: event.user_id.clone(),
            })
            .await?;
        }
        Ok(())
    }

    pub async fn current_stock(&self, product_id: &str, variant_id: Option<&str>) -> Result<i64> {
        self.store.current_stock(product_id, variant_id).await
    }

    pub async fn alerts(&self) -> Result<Vec<InventoryAlert>> {
        self.store.alerts().await
    }

    /// One scan pass: resolve alerts whose stock recovered, raise alerts
    /// for crossings not yet covered by one, then try to notify everything
    /// still open. An alert keeps covering its crossing until resolution,
    /// so a persistent low level produces exactly one alert, not one per
    /// scan. Returns the number of alerts created.
    pub async fn run_scan(&self) -> Result<usize> {
        let mut created = 0;
        for level in self.store.stock_levels().await? {
            let threshold = self.thresholds.for_product(&level.product_id);
            if level.stock > threshold {
                self.store
                    .resolve_alerts(&level.product_id, level.variant_id.as_deref())
                    .await?;
                continue;
            }
            if self
                .store
                .unresolved_alert_exists(&level.product_id, level.variant_id.as_deref())
                .await?
            {
                continue;
            }
            let alert = InventoryAlert::for_stock_level(
                level.product_id.clone(),
                level.variant_id.clone(),
                level.stock,
                threshold,
            );
            self.store.insert_alert(alert).await?;
            created += 1;
        }

        for alert in self.store.open_alerts().await? {
            match self.notifier.notify(&alert).await {
                Ok(()) => self.store.mark_alert_notified(&alert.id).await?,
                Err(e) => {
                    tracing::warn!(alert_id = %alert.id, error = %e, "alert notification failed, left open");
                }
            }
        }
        Ok(created)
    }

    /// Long-lived scan loop. Cancelling via the watch channel lets the scan
    /// in progress finish before the task exits.
    pub fn spawn_scan_loop(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let service = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.run_scan().await {
                            Ok(created) if created > 0 => {
                                tracing::info!(created, "inventory scan raised alerts");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "inventory scan failed"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::info!("inventory alert scan stopped");
        })
    }
}
