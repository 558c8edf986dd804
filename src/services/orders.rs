//! Order service: lifecycle operations plus event publication.
//!
//! Publish policy: the local change commits first, then the event goes out;
//! if the publish fails the committed change is rolled back so no change is
//! left un-announced and no event announces a change that did not commit.

use std::sync::Arc;

use crate::domain::order::{LineItem, Order, OrderStatus, StatusChange};
use crate::error::Result;
use crate::messaging::bus::MessageBus;
use crate::messaging::envelope::{
    Envelope, EventPayload, OrderCreated, OrderLine, OrderStatusChanged,
};
use crate::store::OrderStore;

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    bus: Arc<dyn MessageBus>,
    service_name: String,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, bus: Arc<dyn MessageBus>, service_name: &str) -> Self {
        Self {
            store,
            bus,
            service_name: service_name.to_string(),
        }
    }

    pub async fn create_order(&self, user_id: &str, items: Vec<LineItem>) -> Result<Order> {
        let order = Order::create(user_id, items)?;
        self.store.insert(order.clone()).await?;

        let envelope = Envelope::new(
            &self.service_name,
            EventPayload::OrderCreated(OrderCreated {
                order_id: order.id().to_string(),
                order_number: order.order_number().to_string(),
                user_id: order.user_id().to_string(),
                total_amount: order.total_amount(),
                status: order.status().to_string(),
                order_date: order.order_date(),
                items: order
                    .items()
                    .iter()
                    .map(|item| OrderLine {
                        product_id: item.product_id.clone(),
                        variant_id: item.variant_id.clone(),
                        product_name: item.product_name.clone(),
                        quantity: item.quantity,
                        unit_price: item.unit_price,
                        subtotal: item.subtotal(),
                    })
                    .collect(),
            }),
        );
        if let Err(e) = self.bus.publish_event(&envelope).await {
            tracing::warn!(order_id = order.id(), error = %e, "publish failed, rolling back order creation");
            self.store.delete(order.id()).await?;
            return Err(e);
        }
        tracing::info!(order_id = order.id(), order_number = order.order_number(), "order created");
        Ok(order)
    }

    /// Applies a legal status transition and announces it.
    pub async fn update_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
        reason: Option<String>,
        actor: &str,
    ) -> Result<Order> {
        let mut order = self.store.get(order_id).await?;
        let previous = order.clone();
        let change = order.transition(new_status, actor, reason)?;
        self.commit_and_announce(order, previous, change).await
    }

    /// Rejected outright for shipped or delivered orders.
    pub async fn cancel(&self, order_id: &str, reason: Option<String>, actor: &str) -> Result<Order> {
        let mut order = self.store.get(order_id).await?;
        let previous = order.clone();
        let change = order.cancel(actor, reason)?;
        self.commit_and_announce(order, previous, change).await
    }

    pub async fn get(&self, order_id: &str) -> Result<Order> {
        self.store.get(order_id).await
    }

    pub async fn get_by_number(&self, order_number: &str) -> Result<Order> {
        self.store.get_by_number(order_number).await
    }

    async fn commit_and_announce(
        &self,
        order: Order,
        previous: Order,
        change: StatusChange,
    ) -> Result<Order> {
        self.store.update(&order).await?;

        let envelope = Envelope::new(
            &self.service_name,
            EventPayload::OrderStatusChanged(OrderStatusChanged {
                order_id: order.id().to_string(),
                order_number: order.order_number().to_string(),
                user_id: order.user_id().to_string(),
                old_status: change.from.to_string(),
                new_status: change.to.to_string(),
                reason: change.reason.clone(),
                changed_at: change.at,
            }),
        );
        if let Err(e) = self.bus.publish_event(&envelope).await {
            tracing::warn!(
                order_id = order.id(),
                error = %e,
                "publish failed, rolling back status transition"
            );
            self.store.restore(previous).await?;
            return Err(e);
        }
        tracing::info!(
            order_id = order.id(),
            from = %change.from,
            to = %change.to,
            "order status changed"
        );
        Ok(order)
    }
}
