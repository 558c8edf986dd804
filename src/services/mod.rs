//! Domain services: state-machine operations plus event publication.

pub mod inventory;
pub mod orders;
pub mod payments;

pub use inventory::{AlertNotifier, AlertThresholds, InventoryService, LogNotifier, NewChange};
pub use orders::OrderService;
pub use payments::{CreatePayment, PaymentOutcome, PaymentService};
