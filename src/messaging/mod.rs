//! Messaging core: envelope contract, bus contract and transports, and the
//! handler registration/dispatch table.

pub mod bus;
pub mod envelope;
pub mod memory;
pub mod nats;
pub mod registry;

pub use bus::{DeliveryCallback, MessageBus, SubscribeOptions, DEFAULT_EXCHANGE};
pub use envelope::{routing, Envelope, EventPayload};
pub use memory::{DeadLetter, InMemoryBroker};
pub use nats::NatsBus;
pub use registry::{HandlerRegistry, MessageHandler};
