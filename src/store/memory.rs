//! In-memory store implementations.
//!
//! Reference implementation of the store traits, used by the test suite and
//! by deployments without a DATABASE_URL. A single lock per entity family
//! makes the idempotency check-and-append and the version check atomic.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::inventory::{AlertStatus, ChangeKey, InventoryAlert, InventoryChange};
use crate::domain::order::Order;
use crate::domain::payment::{PaymentMethod, PaymentTransaction, Refund};
use crate::error::{Error, Result};
use crate::store::{InventoryStore, OrderStore, PaymentStore, StockLevel};

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(order.id()) {
            return Err(Error::Storage(format!("order {} already exists", order.id())));
        }
        orders.insert(order.id().to_string(), order);
        Ok(())
    }

    async fn update(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        let existing = orders.get(order.id()).ok_or(Error::NotFound("order"))?;
        if existing.version() + 1 != order.version() {
            return Err(Error::ConcurrencyConflict);
        }
        orders.insert(order.id().to_string(), order.clone());
        Ok(())
    }

    async fn restore(&self, order: Order) -> Result<()> {
        self.orders
            .write()
            .await
            .insert(order.id().to_string(), order);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.orders.write().await.remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Order> {
        self.orders
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(Error::NotFound("order"))
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Order> {
        self.orders
            .read()
            .await
            .values()
            .find(|o| o.order_number() == order_number)
            .cloned()
            .ok_or(Error::NotFound("order"))
    }
}

#[derive(Default)]
struct PaymentState {
    methods: HashMap<String, PaymentMethod>,
    transactions: HashMap<String, PaymentTransaction>,
    refunds: Vec<Refund>,
}

#[derive(Default)]
pub struct MemoryPaymentStore {
    state: RwLock<PaymentState>,
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn insert_method(&self, method: PaymentMethod) -> Result<()> {
        self.state
            .write()
            .await
            .methods
            .insert(method.id.clone(), method);
        Ok(())
    }

    async fn get_method(&self, id: &str) -> Result<PaymentMethod> {
        self.state
            .read()
            .await
            .methods
            .get(id)
            .cloned()
            .ok_or(Error::NotFound("payment method"))
    }

    async fn insert_transaction(&self, transaction: PaymentTransaction) -> Result<()> {
        self.state
            .write()
            .await
            .transactions
            .insert(transaction.id().to_string(), transaction);
        Ok(())
    }

    async fn update_transaction(&self, transaction: &PaymentTransaction) -> Result<()> {
        let mut state = self.state.write().await;
        let existing = state
            .transactions
            .get(transaction.id())
            .ok_or(Error::NotFound("payment transaction"))?;
        if existing.version() + 1 != transaction.version() {
            return Err(Error::ConcurrencyConflict);
        }
        state
            .transactions
            .insert(transaction.id().to_string(), transaction.clone());
        Ok(())
    }

    async fn restore_transaction(&self, transaction: PaymentTransaction) -> Result<()> {
        self.state
            .write()
            .await
            .transactions
            .insert(transaction.id().to_string(), transaction);
        Ok(())
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        self.state.write().await.transactions.remove(id);
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> Result<PaymentTransaction> {
        self.state
            .read()
            .await
            .transactions
            .get(id)
            .cloned()
            .ok_or(Error::NotFound("payment transaction"))
    }

    async fn insert_refund(&self, refund: Refund, transaction: &PaymentTransaction) -> Result<()> {
        let mut state = self.state.write().await;
        let existing = state
            .transactions
            .get(transaction.id())
            .ok_or(Error::NotFound("payment transaction"))?;
        if existing.version() + 1 != transaction.version() {
            return Err(Error::ConcurrencyConflict);
        }
        state
            .transactions
            .insert(transaction.id().to_string(), transaction.clone());
        state.refunds.push(refund);
        Ok(())
    }

    async fn update_refund(&self, refund: &Refund) -> Result<()> {
        let mut state = self.state.write().await;
        let slot = state
            .refunds
            .iter_mut()
            .find(|r| r.id() == refund.id())
            .ok_or(Error::NotFound("refund"))?;
        *slot = refund.clone();
        Ok(())
    }

    async fn get_refund(&self, id: &str) -> Result<Refund> {
        self.state
            .read()
            .await
            .refunds
            .iter()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or(Error::NotFound("refund"))
    }

    async fn refunds_for_transaction(&self, transaction_id: &str) -> Result<Vec<Refund>> {
        Ok(self
            .state
            .read()
            .await
            .refunds
            .iter()
            .filter(|r| r.payment_transaction_id() == transaction_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct InventoryState {
    changes: Vec<InventoryChange>,
    keys: HashSet<ChangeKey>,
    alerts: Vec<InventoryAlert>,
}

#[derive(Default)]
pub struct MemoryInventoryStore {
    state: RwLock<InventoryState>,
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn append_change(&self, change: InventoryChange) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.keys.insert(change.key()) {
            return Ok(false);
        }
        state.changes.push(change);
        Ok(true)
    }

    async fn changes_for_reference(&self, reference_id: &str) -> Result<Vec<InventoryChange>> {
        Ok(self
            .state
            .read()
            .await
            .changes
            .iter()
            .filter(|c| c.reference_id == reference_id)
            .cloned()
            .collect())
    }

    async fn current_stock(&self, product_id: &str, variant_id: Option<&str>) -> Result<i64> {
        Ok(self
            .state
            .read()
            .await
            .changes
            .iter()
            .filter(|c| c.product_id == product_id && c.variant_id.as_deref() == variant_id)
            .map(|c| c.quantity_delta)
            .sum())
    }

    async fn stock_levels(&self) -> Result<Vec<StockLevel>> {
        let state = self.state.read().await;
        let mut sums: HashMap<(String, Option<String>), i64> = HashMap::new();
        for change in &state.changes {
            *sums
                .entry((change.product_id.clone(), change.variant_id.clone()))
                .or_insert(0) += change.quantity_delta;
        }
        Ok(sums
            .into_iter()
            .map(|((product_id, variant_id), stock)| StockLevel {
                product_id,
                variant_id,
                stock,
            })
            .collect())
    }

    async fn insert_alert(&self, alert: InventoryAlert) -> Result<()> {
        self.state.write().await.alerts.push(alert);
        Ok(())
    }

    async fn unresolved_alert_exists(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> Result<bool> {
        Ok(self.state.read().await.alerts.iter().any(|a| {
            a.product_id == product_id
                && a.variant_id.as_deref() == variant_id
                && a.status.covers_crossing()
        }))
    }

    async fn open_alerts(&self) -> Result<Vec<InventoryAlert>> {
        Ok(self
            .state
            .read()
            .await
            .alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Open)
            .cloned()
            .collect())
    }

    async fn mark_alert_notified(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let alert = state
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(Error::NotFound("inventory alert"))?;
        alert.status = AlertStatus::Notified;
        alert.notified_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn resolve_alerts(&self, product_id: &str, variant_id: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        for alert in state.alerts.iter_mut().filter(|a| {
            a.product_id == product_id
                && a.variant_id.as_deref() == variant_id
                && a.status.covers_crossing()
        }) {
            alert.status = AlertStatus::Resolved;
        }
        Ok(())
    }

    async fn alerts(&self) -> Result<Vec<InventoryAlert>> {
        Ok(self.state.read().await.alerts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::inventory::ChangeType;
    use crate::domain::order::{LineItem, OrderStatus};
    use std::sync::Arc;

    fn order() -> Order {
        Order::create(
            "U1",
            vec![LineItem {
                product_id: "P1".into(),
                variant_id: None,
                product_name: "Widget".into(),
                quantity: 1,
                unit_price: "5.00".parse().unwrap(),
            }],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn losing_concurrent_writer_gets_a_conflict() {
        let store = MemoryOrderStore::default();
        let order = order();
        store.insert(order.clone()).await.unwrap();

        let mut first = store.get(order.id()).await.unwrap();
        let mut second = store.get(order.id()).await.unwrap();
        first.transition(OrderStatus::Paid, "a", None).unwrap();
        second.cancel("b", None).unwrap();

        store.update(&first).await.unwrap();
        assert!(matches!(
            store.update(&second).await,
            Err(Error::ConcurrencyConflict)
        ));
        assert_eq!(
            store.get(order.id()).await.unwrap().status(),
            OrderStatus::Paid
        );
    }

    #[tokio::test]
    async fn lookup_by_id_and_number_are_equivalent() {
        let store = MemoryOrderStore::default();
        let order = order();
        store.insert(order.clone()).await.unwrap();
        let by_id = store.get(order.id()).await.unwrap();
        let by_number = store.get_by_number(order.order_number()).await.unwrap();
        assert_eq!(by_id.id(), by_number.id());
    }

    #[tokio::test]
    async fn refund_validated_against_a_stale_balance_conflicts() {
        let store = MemoryPaymentStore::default();
        let mut txn =
            PaymentTransaction::create("O1", "U1", "PM1", "100.00".parse().unwrap(), "USD")
                .unwrap();
        txn.complete("EXT-1").unwrap();
        store.insert_transaction(txn.clone()).await.unwrap();

        // Two writers validate against the same refundable balance.
        let mut first_view = store.get_transaction(txn.id()).await.unwrap();
        let mut second_view = store.get_transaction(txn.id()).await.unwrap();
        let first = Refund::create(&first_view, &[], "60.00".parse().unwrap(), "a").unwrap();
        let second = Refund::create(&second_view, &[], "60.00".parse().unwrap(), "b").unwrap();
        first_view.reserve_refund();
        second_view.reserve_refund();

        store.insert_refund(first, &first_view).await.unwrap();
        assert!(matches!(
            store.insert_refund(second, &second_view).await,
            Err(Error::ConcurrencyConflict)
        ));
        assert_eq!(
            store.refunds_for_transaction(txn.id()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn duplicate_change_key_is_skipped() {
        let store = MemoryInventoryStore::default();
        let change = InventoryChange::new("P1", None, ChangeType::OrderCreated, -2, "r", "O1", "U1");
        assert!(store.append_change(change.clone()).await.unwrap());
        let replay = InventoryChange::new("P1", None, ChangeType::OrderCreated, -2, "r", "O1", "U1");
        assert!(!store.append_change(replay).await.unwrap());
        assert_eq!(store.current_stock("P1", None).await.unwrap(), -2);
    }

    #[tokio::test]
    async fn stock_is_the_sum_of_deltas_under_concurrent_writes() {
        let store = Arc::new(MemoryInventoryStore::default());
        let mut handles = Vec::new();
        for i in 0..20i64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let delta = if i % 2 == 0 { 5 } else { -3 };
                let change = InventoryChange::new(
                    "P1",
                    None,
                    ChangeType::Adjustment,
                    delta,
                    "interleaved",
                    format!("REF-{i}"),
                    "U1",
                );
                store.append_change(change).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // 10 writes of +5 and 10 of -3
        assert_eq!(store.current_stock("P1", None).await.unwrap(), 20);
    }
}
