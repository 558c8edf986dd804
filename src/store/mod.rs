//! Durable stores behind each service.
//!
//! One store trait per owning service. Mutations are serialized with an
//! optimistic version check: an update only lands when the stored version is
//! exactly one behind the entity being written, and a losing concurrent
//! writer gets a retryable `Error::ConcurrencyConflict`.
//!
//! `restore` variants exist for one purpose: a service that committed a
//! transition but could not announce it puts the previous state back so no
//! un-announced change survives (see the services' publish policy).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::inventory::{InventoryAlert, InventoryChange};
use crate::domain::order::Order;
use crate::domain::payment::{PaymentMethod, PaymentTransaction, Refund};
use crate::error::Result;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> Result<()>;
    /// Version-checked write of an already-transitioned order.
    async fn update(&self, order: &Order) -> Result<()>;
    /// Compensating overwrite, no version check.
    async fn restore(&self, order: Order) -> Result<()>;
    /// Compensating removal of a just-inserted order.
    async fn delete(&self, id: &str) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Order>;
    async fn get_by_number(&self, order_number: &str) -> Result<Order>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_method(&self, method: PaymentMethod) -> Result<()>;
    async fn get_method(&self, id: &str) -> Result<PaymentMethod>;

    async fn insert_transaction(&self, transaction: PaymentTransaction) -> Result<()>;
    async fn update_transaction(&self, transaction: &PaymentTransaction) -> Result<()>;
    async fn restore_transaction(&self, transaction: PaymentTransaction) -> Result<()>;
    async fn delete_transaction(&self, id: &str) -> Result<()>;
    async fn get_transaction(&self, id: &str) -> Result<PaymentTransaction>;

    /// Writes the refund together with the version-bumped transaction it
    /// was validated against, atomically. The version check makes a refund
    /// validated against a stale refundable balance fail with
    /// `ConcurrencyConflict` instead of landing.
    async fn insert_refund(&self, refund: Refund, transaction: &PaymentTransaction) -> Result<()>;
    async fn update_refund(&self, refund: &Refund) -> Result<()>;
    async fn get_refund(&self, id: &str) -> Result<Refund>;
    async fn refunds_for_transaction(&self, transaction_id: &str) -> Result<Vec<Refund>>;
}

#[derive(Clone, Debug)]
pub struct StockLevel {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub stock: i64,
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Appends the change unless one with the same idempotency key already
    /// exists. Returns whether the change was applied; the check and the
    /// append are atomic.
    async fn append_change(&self, change: InventoryChange) -> Result<bool>;
    async fn changes_for_reference(&self, reference_id: &str) -> Result<Vec<InventoryChange>>;
    async fn current_stock(&self, product_id: &str, variant_id: Option<&str>) -> Result<i64>;
    /// Summed stock per (product, variant) key, for the alert scan.
    async fn stock_levels(&self) -> Result<Vec<StockLevel>>;

    async fn insert_alert(&self, alert: InventoryAlert) -> Result<()>;
    /// Whether an alert still covering the crossing (open or notified)
    /// exists for the key.
    async fn unresolved_alert_exists(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> Result<bool>;
    async fn open_alerts(&self) -> Result<Vec<InventoryAlert>>;
    async fn mark_alert_notified(&self, id: &str) -> Result<()>;
    /// Marks every covering alert for the key resolved; used when stock
    /// recovers above the threshold.
    async fn resolve_alerts(&self, product_id: &str, variant_id: Option<&str>) -> Result<()>;
    async fn alerts(&self) -> Result<Vec<InventoryAlert>>;
}
