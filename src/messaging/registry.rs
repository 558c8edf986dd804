//! Handler registration and dispatch.
//!
//! The registry is an explicit table populated at process start: one
//! `register` call per handler, no runtime discovery. `start` wires one
//! durable queue per (consumer, handler) pair and wraps every delivery in a
//! dispatch that logs start/outcome with the envelope id and classifies
//! failures: a domain invariant violation is acknowledged (retrying cannot
//! change the outcome), anything else propagates so the broker redelivers.
//!
//! Each dispatch is an isolated unit of work: handlers reach shared state
//! only through their service's store handle, never through mutable state
//! shared with other in-flight deliveries.

use std::sync::Arc;

use crate::error::Result;
use crate::messaging::bus::{DeliveryCallback, MessageBus, SubscribeOptions};
use crate::messaging::envelope::Envelope;

#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Routing key of the event this handler consumes.
    fn message_type(&self) -> &'static str;

    /// `<entity>.<event>` suffix of the durable queue name.
    fn queue_suffix(&self) -> &'static str;

    async fn handle(&self, envelope: &Envelope) -> Result<()>;
}

pub struct HandlerRegistry {
    consumer: String,
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new(consumer: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
            handlers: Vec::new(),
        }
    }

    pub fn register(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Subscribe every registered handler on its own durable queue.
    pub async fn start(&self, bus: &dyn MessageBus) -> Result<()> {
        for handler in &self.handlers {
            let opts = SubscribeOptions::new(
                &self.consumer,
                handler.queue_suffix(),
                handler.message_type(),
            );
            tracing::info!(
                consumer = %self.consumer,
                queue = %opts.queue,
                routing_key = %opts.routing_key,
                "registering handler"
            );
            let handler = Arc::clone(handler);
            let callback: DeliveryCallback = Arc::new(move |envelope| {
                let handler = Arc::clone(&handler);
                Box::pin(async move { dispatch(handler.as_ref(), &envelope).await })
            });
            bus.subscribe(opts, callback).await?;
        }
        Ok(())
    }
}

async fn dispatch(handler: &dyn MessageHandler, envelope: &Envelope) -> Result<()> {
    let id = envelope.id();
    let kind = envelope.routing_key();
    tracing::debug!(%id, kind, "handling message");
    match handler.handle(envelope).await {
        Ok(()) => {
            tracing::debug!(%id, kind, "handled");
            Ok(())
        }
        Err(e) if e.is_domain_violation() => {
            // Acknowledge: redelivery cannot change a rejected invariant.
            tracing::warn!(%id, kind, error = %e, "domain violation while handling, acknowledged");
            Ok(())
        }
        Err(e) => {
            tracing::error!(%id, kind, error = %e, "handler failed, leaving for redelivery");
            Err(e)
        }
    }
}
