//! Publish/subscribe contract over a durable topic-routed broker.
//!
//! `publish` returns once the broker acknowledges receipt, not once every
//! subscriber has processed the message. Delivery to subscribers is
//! at-least-once: a callback error requeues the message, so handlers must be
//! idempotent with respect to repeated delivery of the same envelope.
//! Ordering is only guaranteed among messages with the same routing key
//! published by the same process.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::messaging::envelope::Envelope;

pub const DEFAULT_EXCHANGE: &str = "ecommerce";

/// Invoked once per delivered message. An `Err` return signals the broker to
/// apply its redelivery policy; `Ok` acknowledges the delivery.
pub type DeliveryCallback = Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct SubscribeOptions {
    pub exchange: String,
    /// Durable queue name, one per (consumer, event) pair so each subscriber
    /// has independent consumer lag.
    pub queue: String,
    pub routing_key: String,
    pub consumer: String,
}

impl SubscribeOptions {
    /// Queue naming convention: `<consumer>.<entity>.<event>`,
    /// e.g. `inventory-service.orders.created`.
    pub fn new(consumer: &str, queue_suffix: &str, routing_key: &str) -> Self {
        Self {
            exchange: DEFAULT_EXCHANGE.to_string(),
            queue: format!("{consumer}.{queue_suffix}"),
            routing_key: routing_key.to_string(),
            consumer: consumer.to_string(),
        }
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Hands the envelope to the broker for fan-out to every queue bound by
    /// a matching routing pattern. Fails with `Error::BrokerUnavailable`
    /// when the broker cannot be reached or the confirm times out; the
    /// caller decides whether to retry or surface the failure.
    async fn publish(&self, envelope: &Envelope, exchange: &str, routing_key: &str) -> Result<()>;

    /// Declares a durable queue bound to the exchange and registers the
    /// callback to run once per delivered message.
    async fn subscribe(&self, opts: SubscribeOptions, callback: DeliveryCallback) -> Result<()>;

    /// Graceful shutdown: stop accepting deliveries and drain in-flight work.
    async fn shutdown(&self) -> Result<()>;

    /// Publish on the default exchange with the payload's own routing key.
    async fn publish_event(&self, envelope: &Envelope) -> Result<()> {
        self.publish(envelope, DEFAULT_EXCHANGE, envelope.routing_key())
            .await
    }
}
