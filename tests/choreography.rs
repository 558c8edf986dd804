//! End-to-end choreography over the in-memory broker and stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use orderflow::domain::order::{LineItem, OrderStatus};
use orderflow::domain::payment::PaymentMethod;
use orderflow::error::{Error, Result};
use orderflow::handlers::{OrderCreatedHandler, PaymentCompletedHandler, PaymentFailedHandler};
use orderflow::messaging::envelope::{Envelope, EventPayload, OrderCreated, OrderLine};
use orderflow::messaging::{
    DeliveryCallback, HandlerRegistry, InMemoryBroker, MessageBus, SubscribeOptions,
};
use orderflow::services::{
    AlertThresholds, CreatePayment, InventoryService, LogNotifier, OrderService, PaymentOutcome,
    PaymentService,
};
use orderflow::store::memory::{MemoryInventoryStore, MemoryOrderStore, MemoryPaymentStore};
use orderflow::store::InventoryStore;

struct World {
    broker: Arc<InMemoryBroker>,
    orders: Arc<OrderService>,
    payments: Arc<PaymentService>,
    inventory: Arc<InventoryService>,
    inventory_store: Arc<MemoryInventoryStore>,
    payment_store: Arc<MemoryPaymentStore>,
}

async fn world() -> World {
    world_with_threshold(10).await
}

async fn world_with_threshold(threshold: i64) -> World {
    let broker = Arc::new(InMemoryBroker::new(5));
    let bus: Arc<dyn MessageBus> = broker.clone();

    let order_store = Arc::new(MemoryOrderStore::default());
    let payment_store = Arc::new(MemoryPaymentStore::default());
    let inventory_store = Arc::new(MemoryInventoryStore::default());

    let orders = Arc::new(OrderService::new(
        order_store.clone(),
        Arc::clone(&bus),
        "order-service",
    ));
    let payments = Arc::new(PaymentService::new(
        payment_store.clone(),
        Arc::clone(&bus),
        "payment-service",
    ));
    let inventory = Arc::new(InventoryService::new(
        inventory_store.clone(),
        Arc::clone(&bus),
        "inventory-service",
        AlertThresholds::uniform(threshold),
        Arc::new(LogNotifier),
    ));

    HandlerRegistry::new("inventory-service")
        .register(Arc::new(OrderCreatedHandler::new(Arc::clone(&inventory))))
        .start(bus.as_ref())
        .await
        .unwrap();
    HandlerRegistry::new("order-service")
        .register(Arc::new(PaymentCompletedHandler::new(Arc::clone(&orders))))
        .register(Arc::new(PaymentFailedHandler::new(Arc::clone(&orders))))
        .start(bus.as_ref())
        .await
        .unwrap();

    World {
        broker,
        orders,
        payments,
        inventory,
        inventory_store,
        payment_store,
    }
}

async fn eventually<F, Fut>(mut condition: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s: {what}");
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn widget(quantity: u32) -> LineItem {
    LineItem {
        product_id: "P1".into(),
        variant_id: None,
        product_name: "Widget".into(),
        quantity,
        unit_price: dec("10.00"),
    }
}

async fn seed_method(world: &World, id: &str, user: &str, active: bool) {
    use orderflow::store::PaymentStore;
    world
        .payment_store
        .insert_method(PaymentMethod {
            id: id.into(),
            user_id: user.into(),
            method_type: "card".into(),
            active,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn order_created_event_decrements_inventory_exactly_once() {
    let w = world().await;

    let envelope = Envelope::new(
        "order-service",
        EventPayload::OrderCreated(OrderCreated {
            order_id: "O1".into(),
            order_number: "ORD-00000001".into(),
            user_id: "U1".into(),
            total_amount: dec("20.00"),
            status: "created".into(),
            order_date: chrono::Utc::now(),
            items: vec![OrderLine {
                product_id: "P1".into(),
                variant_id: None,
                product_name: "Widget".into(),
                quantity: 2,
                unit_price: dec("10.00"),
                subtotal: dec("20.00"),
            }],
        }),
    );

    w.broker.publish_event(&envelope).await.unwrap();
    let inv = w.inventory.clone();
    eventually(
        || {
            let inv = inv.clone();
            async move { inv.current_stock("P1", None).await.unwrap() == -2 }
        },
        "inventory decremented",
    )
    .await;

    // Redeliver the identical envelope: still exactly one ledger row.
    w.broker.publish_event(&envelope).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let changes = w.inventory_store.changes_for_reference("O1").await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].quantity_delta, -2);
    assert_eq!(changes[0].product_id, "P1");
    assert_eq!(w.inventory.current_stock("P1", None).await.unwrap(), -2);
}

#[tokio::test]
async fn payment_lifecycle_drives_the_order() {
    let w = world().await;
    seed_method(&w, "PM1", "U1", true).await;

    let order = w.orders.create_order("U1", vec![widget(1)]).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Created);

    let txn = w
        .payments
        .create_payment(CreatePayment {
            order_id: order.id().to_string(),
            user_id: "U1".into(),
            payment_method_id: "PM1".into(),
            amount: order.total_amount(),
            currency: "USD".into(),
        })
        .await
        .unwrap();

    w.payments
        .process_payment(
            txn.id(),
            PaymentOutcome::Success {
                external_reference: "EXT-1".into(),
            },
        )
        .await
        .unwrap();

    let orders = w.orders.clone();
    let order_id = order.id().to_string();
    eventually(
        || {
            let orders = orders.clone();
            let order_id = order_id.clone();
            async move { orders.get(&order_id).await.unwrap().status() == OrderStatus::Paid }
        },
        "order marked paid",
    )
    .await;

    // The inventory side also saw the order.created event.
    eventually(
        || {
            let inv = w.inventory.clone();
            async move { inv.current_stock("P1", None).await.unwrap() == -1 }
        },
        "inventory decremented",
    )
    .await;
}

#[tokio::test]
async fn failed_payment_cancels_the_order() {
    let w = world().await;
    seed_method(&w, "PM1", "U1", true).await;

    let order = w.orders.create_order("U1", vec![widget(1)]).await.unwrap();
    let txn = w
        .payments
        .create_payment(CreatePayment {
            order_id: order.id().to_string(),
            user_id: "U1".into(),
            payment_method_id: "PM1".into(),
            amount: order.total_amount(),
            currency: "USD".into(),
        })
        .await
        .unwrap();

    w.payments
        .process_payment(
            txn.id(),
            PaymentOutcome::Failure {
                error: "card declined".into(),
            },
        )
        .await
        .unwrap();

    let orders = w.orders.clone();
    let order_id = order.id().to_string();
    eventually(
        || {
            let orders = orders.clone();
            let order_id = order_id.clone();
            async move { orders.get(&order_id).await.unwrap().status() == OrderStatus::Cancelled }
        },
        "order cancelled",
    )
    .await;

    let cancelled = w.orders.get(order.id()).await.unwrap();
    let last = cancelled.history().last().unwrap();
    assert_eq!(last.reason.as_deref(), Some("payment failed: card declined"));
}

#[tokio::test]
async fn cancelling_a_delivered_order_is_rejected_without_an_event() {
    let w = world().await;
    let order = w.orders.create_order("U1", vec![widget(1)]).await.unwrap();
    for status in [OrderStatus::Paid, OrderStatus::Shipped, OrderStatus::Delivered] {
        w.orders
            .update_status(order.id(), status, None, "test")
            .await
            .unwrap();
    }

    // Probe queue counting order.status.changed events.
    let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let probe = Arc::clone(&count);
    let callback: DeliveryCallback = Arc::new(move |_| {
        let probe = Arc::clone(&probe);
        Box::pin(async move {
            probe.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
    });
    w.broker
        .subscribe(
            SubscribeOptions::new("probe", "orders.status-changed", "order.status.changed"),
            callback,
        )
        .await
        .unwrap();

    let err = w.orders.cancel(order.id(), None, "test").await;
    assert!(matches!(err, Err(Error::InvalidOperation(_))));
    assert_eq!(
        w.orders.get(order.id()).await.unwrap().status(),
        OrderStatus::Delivered
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refund_bound_is_enforced_through_the_service() {
    let w = world().await;
    seed_method(&w, "PM1", "U1", true).await;

    let txn = w
        .payments
        .create_payment(CreatePayment {
            order_id: "O1".into(),
            user_id: "U1".into(),
            payment_method_id: "PM1".into(),
            amount: dec("100.00"),
            currency: "USD".into(),
        })
        .await
        .unwrap();
    w.payments
        .process_payment(
            txn.id(),
            PaymentOutcome::Success {
                external_reference: "EXT-1".into(),
            },
        )
        .await
        .unwrap();

    let first = w
        .payments
        .create_refund(txn.id(), dec("60.00"), "damaged item")
        .await
        .unwrap();
    w.payments.process_refund(first.id(), true).await.unwrap();

    let too_much = w
        .payments
        .create_refund(txn.id(), dec("40.01"), "rest")
        .await;
    assert!(matches!(
        too_much,
        Err(Error::InsufficientRefundableAmount { .. })
    ));

    let exact = w.payments.create_refund(txn.id(), dec("40.00"), "rest").await;
    assert!(exact.is_ok());
}

#[tokio::test]
async fn concurrent_refunds_cannot_exceed_the_bound() {
    let w = world().await;
    seed_method(&w, "PM1", "U1", true).await;

    let txn = w
        .payments
        .create_payment(CreatePayment {
            order_id: "O1".into(),
            user_id: "U1".into(),
            payment_method_id: "PM1".into(),
            amount: dec("100.00"),
            currency: "USD".into(),
        })
        .await
        .unwrap();
    w.payments
        .process_payment(
            txn.id(),
            PaymentOutcome::Success {
                external_reference: "EXT-1".into(),
            },
        )
        .await
        .unwrap();

    let first = {
        let payments = w.payments.clone();
        let id = txn.id().to_string();
        tokio::spawn(async move { payments.create_refund(&id, dec("60.00"), "damaged").await })
    };
    let second = {
        let payments = w.payments.clone();
        let id = txn.id().to_string();
        tokio::spawn(async move { payments.create_refund(&id, dec("60.00"), "damaged").await })
    };
    let outcomes = [first.await.unwrap(), second.await.unwrap()];

    let successes = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(successes, 1);
    // The loser sees either the stale-balance conflict or the recomputed
    // bound, depending on interleaving.
    for outcome in outcomes {
        if let Err(e) = outcome {
            assert!(matches!(
                e,
                Error::ConcurrencyConflict | Error::InsufficientRefundableAmount { .. }
            ));
        }
    }

    use orderflow::store::PaymentStore;
    let refunds = w
        .payment_store
        .refunds_for_transaction(txn.id())
        .await
        .unwrap();
    assert_eq!(refunds.len(), 1);
}

#[tokio::test]
async fn inactive_payment_method_is_rejected() {
    let w = world().await;
    seed_method(&w, "PM2", "U1", false).await;

    let err = w
        .payments
        .create_payment(CreatePayment {
            order_id: "O1".into(),
            user_id: "U1".into(),
            payment_method_id: "PM2".into(),
            amount: dec("10.00"),
            currency: "USD".into(),
        })
        .await;
    assert!(matches!(err, Err(Error::Validation(_))));
}

#[tokio::test]
async fn processing_a_settled_payment_is_rejected() {
    let w = world().await;
    seed_method(&w, "PM1", "U1", true).await;
    let txn = w
        .payments
        .create_payment(CreatePayment {
            order_id: "O1".into(),
            user_id: "U1".into(),
            payment_method_id: "PM1".into(),
            amount: dec("10.00"),
            currency: "USD".into(),
        })
        .await
        .unwrap();
    w.payments
        .process_payment(
            txn.id(),
            PaymentOutcome::Success {
                external_reference: "EXT-1".into(),
            },
        )
        .await
        .unwrap();

    let again = w
        .payments
        .process_payment(
            txn.id(),
            PaymentOutcome::Success {
                external_reference: "EXT-2".into(),
            },
        )
        .await;
    assert!(matches!(again, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn scan_raises_and_notifies_alerts_once_per_crossing() {
    let w = world_with_threshold(10).await;

    let envelope = Envelope::new(
        "order-service",
        EventPayload::OrderCreated(OrderCreated {
            order_id: "O1".into(),
            order_number: "ORD-00000002".into(),
            user_id: "U1".into(),
            total_amount: dec("50.00"),
            status: "created".into(),
            order_date: chrono::Utc::now(),
            items: vec![OrderLine {
                product_id: "P9".into(),
                variant_id: None,
                product_name: "Gadget".into(),
                quantity: 5,
                unit_price: dec("10.00"),
                subtotal: dec("50.00"),
            }],
        }),
    );
    w.broker.publish_event(&envelope).await.unwrap();
    eventually(
        || {
            let inv = w.inventory.clone();
            async move { inv.current_stock("P9", None).await.unwrap() == -5 }
        },
        "stock recorded",
    )
    .await;

    assert_eq!(w.inventory.run_scan().await.unwrap(), 1);
    let alerts = w.inventory.alerts().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "out-of-stock");
    assert!(alerts[0].notified_at.is_some());

    // Further passes: the notified alert still covers the crossing.
    assert_eq!(w.inventory.run_scan().await.unwrap(), 0);
    assert_eq!(w.inventory.run_scan().await.unwrap(), 0);
    assert_eq!(w.inventory.alerts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn alert_is_re_raised_only_after_stock_recovers() {
    use orderflow::domain::inventory::{AlertStatus, ChangeType};
    use orderflow::services::NewChange;

    let w = world_with_threshold(10).await;
    let restock = |reference: &str, delta: i64| NewChange {
        product_id: "P9".into(),
        variant_id: None,
        change_type: if delta > 0 {
            ChangeType::Restock
        } else {
            ChangeType::Adjustment
        },
        quantity_delta: delta,
        reason: "stock movement".into(),
        reference_id: reference.into(),
        user_id: "U1".into(),
    };

    w.inventory.record_change(restock("R1", 5)).await.unwrap();
    assert_eq!(w.inventory.run_scan().await.unwrap(), 1);
    assert_eq!(w.inventory.run_scan().await.unwrap(), 0);

    // Recovery resolves the alert without raising a new one.
    w.inventory.record_change(restock("R2", 20)).await.unwrap();
    assert_eq!(w.inventory.run_scan().await.unwrap(), 0);
    let alerts = w.inventory.alerts().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].status, AlertStatus::Resolved);

    // A fresh crossing after recovery is a new alert.
    w.inventory.record_change(restock("R3", -18)).await.unwrap();
    assert_eq!(w.inventory.run_scan().await.unwrap(), 1);
    assert_eq!(w.inventory.alerts().await.unwrap().len(), 2);
}

#[tokio::test]
async fn scan_loop_shuts_down_cleanly() {
    let w = world().await;
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = Arc::clone(&w.inventory).spawn_scan_loop(Duration::from_millis(10), rx);
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scan loop did not stop")
        .unwrap();
}

/// Bus double whose publishes always fail, for rollback tests.
struct FailingBus;

#[async_trait]
impl MessageBus for FailingBus {
    async fn publish(&self, _: &Envelope, _: &str, _: &str) -> Result<()> {
        Err(Error::BrokerUnavailable("connection refused".into()))
    }

    async fn subscribe(&self, _: SubscribeOptions, _: DeliveryCallback) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn publish_failure_rolls_back_order_creation() {
    let store = Arc::new(MemoryOrderStore::default());
    let orders = OrderService::new(store.clone(), Arc::new(FailingBus), "order-service");

    let err = orders.create_order("U1", vec![widget(1)]).await;
    assert!(matches!(err, Err(Error::BrokerUnavailable(_))));
}

#[tokio::test]
async fn publish_failure_rolls_back_a_transition() {
    let broker = Arc::new(InMemoryBroker::new(3));
    let store = Arc::new(MemoryOrderStore::default());
    let good = OrderService::new(store.clone(), broker, "order-service");
    let order = good.create_order("U1", vec![widget(1)]).await.unwrap();

    let bad = OrderService::new(store.clone(), Arc::new(FailingBus), "order-service");
    let err = bad
        .update_status(order.id(), OrderStatus::Paid, None, "test")
        .await;
    assert!(matches!(err, Err(Error::BrokerUnavailable(_))));

    let reread = good.get(order.id()).await.unwrap();
    assert_eq!(reread.status(), OrderStatus::Created);
    assert_eq!(reread.version(), order.version());
}

#[tokio::test]
async fn poisoned_handler_routes_to_dead_letter_after_budget() {
    use orderflow::messaging::MessageHandler;

    struct Poisoned;

    #[async_trait]
    impl MessageHandler for Poisoned {
        fn message_type(&self) -> &'static str {
            "order.created"
        }
        fn queue_suffix(&self) -> &'static str {
            "orders.created"
        }
        async fn handle(&self, _: &Envelope) -> Result<()> {
            Err(Error::Storage("store down".into()))
        }
    }

    let broker = Arc::new(InMemoryBroker::new(4));
    let bus: Arc<dyn MessageBus> = broker.clone();
    HandlerRegistry::new("inventory-service")
        .register(Arc::new(Poisoned))
        .start(bus.as_ref())
        .await
        .unwrap();

    let envelope = Envelope::new(
        "order-service",
        EventPayload::OrderCreated(OrderCreated {
            order_id: "O1".into(),
            order_number: "ORD-00000003".into(),
            user_id: "U1".into(),
            total_amount: dec("10.00"),
            status: "created".into(),
            order_date: chrono::Utc::now(),
            items: vec![],
        }),
    );
    broker.publish_event(&envelope).await.unwrap();

    let probe = broker.clone();
    eventually(
        || {
            let probe = probe.clone();
            async move { probe.dead_letters().len() == 1 }
        },
        "dead letter recorded",
    )
    .await;
    let dead = broker.dead_letters();
    assert_eq!(dead[0].attempts, 4);
    assert_eq!(dead[0].envelope.id(), envelope.id());
}
