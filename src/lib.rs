//! Orderflow: event-choreographed e-commerce backend core.
//!
//! Independent services coordinate purely through events on a topic-routed
//! broker: no central orchestrator, no cross-service transaction. Delivery
//! is at-least-once, so every handler is idempotent; domain invariants
//! (legal order transitions, refund bounds, no double stock decrement) are
//! enforced by the owning service's state machine.
//!
//! ## Layout
//! - [`messaging`]: envelope contract, bus contract and transports, handler
//!   registry/dispatch
//! - [`domain`]: order, payment/refund and inventory state machines
//! - [`store`]: per-service durable stores (in-memory and Postgres)
//! - [`services`]: lifecycle operations plus event publication
//! - [`handlers`]: the concrete choreography steps
//! - [`api`]: thin HTTP boundary

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod messaging;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
