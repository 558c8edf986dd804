//! Concrete event handlers wiring the services into the choreography.
//!
//! Every handler is idempotent under redelivery: the inventory handler leans
//! on the ledger's change key, and the order-side handlers treat a rejected
//! transition as already-applied work.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::order::OrderStatus;
use crate::error::{Error, Result};
use crate::messaging::envelope::{routing, Envelope, EventPayload};
use crate::messaging::registry::MessageHandler;
use crate::services::inventory::InventoryService;
use crate::services::orders::OrderService;

fn unexpected_payload(queue_kind: &str, envelope: &Envelope) -> Error {
    Error::Misrouted(format!(
        "unexpected payload {} on a {queue_kind} queue",
        envelope.routing_key()
    ))
}

/// order.created → one negative ledger delta per line item.
pub struct OrderCreatedHandler {
    inventory: Arc<InventoryService>,
}

impl OrderCreatedHandler {
    pub fn new(inventory: Arc<InventoryService>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl MessageHandler for OrderCreatedHandler {
    fn message_type(&self) -> &'static str {
        routing::ORDER_CREATED
    }

    fn queue_suffix(&self) -> &'static str {
        "orders.created"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let EventPayload::OrderCreated(event) = envelope.payload() else {
            return Err(unexpected_payload(routing::ORDER_CREATED, envelope));
        };
        self.inventory.apply_order_created(event).await
    }
}

/// payment.completed → order moves to Paid.
pub struct PaymentCompletedHandler {
    orders: Arc<OrderService>,
}

impl PaymentCompletedHandler {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl MessageHandler for PaymentCompletedHandler {
    fn message_type(&self) -> &'static str {
        routing::PAYMENT_COMPLETED
    }

    fn queue_suffix(&self) -> &'static str {
        "payments.completed"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let EventPayload::PaymentCompleted(event) = envelope.payload() else {
            return Err(unexpected_payload(routing::PAYMENT_COMPLETED, envelope));
        };
        match self
            .orders
            .update_status(
                &event.order_id,
                OrderStatus::Paid,
                Some("payment completed".into()),
                envelope.sender(),
            )
            .await
        {
            Ok(_) => Ok(()),
            // Redelivery after the order already left Created.
            Err(Error::InvalidTransition { .. }) => {
                tracing::debug!(order_id = %event.order_id, "order already past created, skipping");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// payment.failed → order is cancelled with the provider's error as reason.
pub struct PaymentFailedHandler {
    orders: Arc<OrderService>,
}

impl PaymentFailedHandler {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl MessageHandler for PaymentFailedHandler {
    fn message_type(&self) -> &'static str {
        routing::PAYMENT_FAILED
    }

    fn queue_suffix(&self) -> &'static str {
        "payments.failed"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let EventPayload::PaymentFailed(event) = envelope.payload() else {
            return Err(unexpected_payload(routing::PAYMENT_FAILED, envelope));
        };
        let reason = event
            .error
            .clone()
            .map(|e| format!("payment failed: {e}"))
            .unwrap_or_else(|| "payment failed".into());
        match self
            .orders
            .cancel(&event.order_id, Some(reason), envelope.sender())
            .await
        {
            Ok(_) => Ok(()),
            // Already cancelled or already progressed; nothing left to do.
            Err(Error::InvalidTransition { .. }) | Err(Error::InvalidOperation(_)) => {
                tracing::debug!(order_id = %event.order_id, "order not cancellable any more, skipping");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::InventoryChanged;
    use crate::messaging::InMemoryBroker;
    use crate::services::inventory::{AlertThresholds, LogNotifier};
    use crate::store::memory::MemoryInventoryStore;

    #[tokio::test]
    async fn wrong_kind_payload_is_not_acked_as_domain_violation() {
        let inventory = Arc::new(InventoryService::new(
            Arc::new(MemoryInventoryStore::default()),
            Arc::new(InMemoryBroker::new(3)),
            "inventory-service",
            AlertThresholds::uniform(10),
            Arc::new(LogNotifier),
        ));
        let handler = OrderCreatedHandler::new(inventory);

        let envelope = Envelope::new(
            "inventory-service",
            EventPayload::InventoryChanged(InventoryChanged {
                product_id: "P1".into(),
                variant_id: None,
                quantity_delta: 1,
                change_type: "restock".into(),
                reference_id: "R1".into(),
            }),
        );
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, Error::Misrouted(_)));
        assert!(!err.is_domain_violation());
    }
}
