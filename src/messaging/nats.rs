//! NATS-backed bus.
//!
//! Subjects are `<exchange>.<routing-key>` and a durable consumer group per
//! queue name gives each (consumer, event) pair independent lag. Publishes
//! are confirmed with a flush under a bounded timeout so a dead broker fails
//! the calling request fast instead of hanging it.
//!
//! Core NATS does not redeliver on consumer error; callback failures are
//! logged here and rely on JetStream (or an upstream retry) in deployments
//! that need broker-side redelivery. The in-memory broker used in tests
//! implements the bounded-retry half of the contract.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::messaging::bus::{DeliveryCallback, MessageBus, SubscribeOptions};
use crate::messaging::envelope::Envelope;

pub struct NatsBus {
    client: async_nats::Client,
    publish_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NatsBus {
    pub async fn connect(url: &str, publish_timeout: Duration) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            client,
            publish_timeout,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// Map an AMQP-style binding pattern onto NATS wildcards: `*` is shared,
/// a trailing `#` becomes `>`.
fn subject_pattern(exchange: &str, routing_key: &str) -> String {
    let key = routing_key.replace('#', ">");
    format!("{exchange}.{key}")
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, envelope: &Envelope, exchange: &str, routing_key: &str) -> Result<()> {
        let subject = format!("{exchange}.{routing_key}");
        let body = serde_json::to_vec(envelope)?;
        let confirm = async {
            self.client
                .publish(subject, body.into())
                .await
                .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
            self.client
                .flush()
                .await
                .map_err(|e| Error::BrokerUnavailable(e.to_string()))
        };
        tokio::time::timeout(self.publish_timeout, confirm)
            .await
            .map_err(|_| Error::BrokerUnavailable("publish confirm timed out".to_string()))?
    }

    async fn subscribe(&self, opts: SubscribeOptions, callback: DeliveryCallback) -> Result<()> {
        let subject = subject_pattern(&opts.exchange, &opts.routing_key);
        let mut subscriber = self
            .client
            .queue_subscribe(subject.clone(), opts.queue.clone())
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;

        let queue = opts.queue.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = subscriber.next() => {
                        let Some(message) = maybe else { break };
                        let envelope: Envelope = match serde_json::from_slice(&message.payload) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                tracing::error!(queue, subject, error = %e, "undecodable message dropped");
                                continue;
                            }
                        };
                        if let Err(e) = callback(envelope).await {
                            tracing::error!(queue, error = %e, "handler failed; no core-NATS redelivery");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        let _ = subscriber.unsubscribe().await;
                        break;
                    }
                }
            }
            tracing::debug!(queue, "consumer stopped");
        });
        self.tasks.lock().unwrap().push(handle);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.client
            .flush()
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_patterns() {
        assert_eq!(
            subject_pattern("ecommerce", "order.created"),
            "ecommerce.order.created"
        );
        assert_eq!(subject_pattern("ecommerce", "order.#"), "ecommerce.order.>");
    }
}
