//! In-memory topic broker.
//!
//! Queue-per-subscriber fan-out with AMQP-style topic matching (`*` matches
//! one dot-separated segment, `#` matches any number). Redelivery is bounded:
//! a delivery whose callback keeps failing is retried up to the configured
//! attempt ceiling and then parked on the dead-letter queue for inspection.
//!
//! This is the broker used by the test suite and by deployments without a
//! NATS URL configured; it keeps the same at-least-once contract as the real
//! transport.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::messaging::bus::{DeliveryCallback, MessageBus, SubscribeOptions};
use crate::messaging::envelope::Envelope;

struct Delivery {
    envelope: Envelope,
    attempt: u32,
}

struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// A message that exhausted its redelivery budget, held for manual
/// inspection instead of being retried forever.
#[derive(Clone, Debug)]
pub struct DeadLetter {
    pub envelope: Envelope,
    pub queue: String,
    pub attempts: u32,
    pub last_error: String,
}

pub struct InMemoryBroker {
    max_attempts: u32,
    bindings: RwLock<Vec<Binding>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl InMemoryBroker {
    pub fn new(max_attempts: u32) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            max_attempts: max_attempts.max(1),
            bindings: RwLock::new(Vec::new()),
            dead_letters: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the dead-letter queue.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBus for InMemoryBroker {
    async fn publish(&self, envelope: &Envelope, exchange: &str, routing_key: &str) -> Result<()> {
        let targets: Vec<mpsc::UnboundedSender<Delivery>> = {
            let bindings = self.bindings.read().unwrap();
            let mut seen = std::collections::HashSet::new();
            bindings
                .iter()
                .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
                .filter(|b| seen.insert(b.queue.clone()))
                .map(|b| b.tx.clone())
                .collect()
        };
        for tx in targets {
            // A closed receiver means its consumer already shut down; the
            // message is simply not deliverable to that queue any more.
            let _ = tx.send(Delivery {
                envelope: envelope.clone(),
                attempt: 1,
            });
        }
        Ok(())
    }

    async fn subscribe(&self, opts: SubscribeOptions, callback: DeliveryCallback) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        self.bindings.write().unwrap().push(Binding {
            exchange: opts.exchange.clone(),
            pattern: opts.routing_key.clone(),
            queue: opts.queue.clone(),
            tx: tx.clone(),
        });

        let max_attempts = self.max_attempts;
        let dead_letters = Arc::clone(&self.dead_letters);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let queue = opts.queue.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        let Some(delivery) = maybe else { break };
                        consume(&callback, delivery, &tx, max_attempts, &dead_letters, &queue).await;
                    }
                    _ = shutdown_rx.changed() => {
                        // Drain what is already queued, then stop.
                        while let Ok(delivery) = rx.try_recv() {
                            consume(&callback, delivery, &tx, max_attempts, &dead_letters, &queue).await;
                        }
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
        Ok(())
    }
}

async fn consume(
    callback: &DeliveryCallback,
    delivery: Delivery,
    tx: &mpsc::UnboundedSender<Delivery>,
    max_attempts: u32,
    dead_letters: &Mutex<Vec<DeadLetter>>,
    queue: &str,
) {
    let Delivery { envelope, attempt } = delivery;
    match callback(envelope.clone()).await {
        Ok(()) => {}
        Err(e) if attempt >= max_attempts => {
            tracing::error!(
                queue,
                id = %envelope.id(),
                attempts = attempt,
                error = %e,
                "redelivery budget exhausted, routing to dead-letter queue"
            );
            dead_letters.lock().unwrap().push(DeadLetter {
                envelope,
                queue: queue.to_string(),
                attempts: attempt,
                last_error: e.to_string(),
            });
        }
        Err(e) => {
            tracing::warn!(queue, id = %envelope.id(), attempt, error = %e, "redelivering");
            let _ = tx.send(Delivery {
                envelope,
                attempt: attempt + 1,
            });
        }
    }
}

/// AMQP-style topic match: `*` matches exactly one segment, `#` any number.
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn rec(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.split_first(), key.split_first()) {
            (None, None) => true,
            (Some((&"#", rest_p)), _) => {
                rec(rest_p, key) || (!key.is_empty() && rec(pattern, &key[1..]))
            }
            (Some((&"*", rest_p)), Some((_, rest_k))) => rec(rest_p, rest_k),
            (Some((p, rest_p)), Some((k, rest_k))) if p == k => rec(rest_p, rest_k),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    rec(&pattern, &key)
}
