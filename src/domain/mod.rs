//! Invariant-bearing domain logic: the order, payment/refund and inventory
//! state machines. Each entity family is owned by exactly one service;
//! cross-service knowledge travels only through events.

pub mod inventory;
pub mod order;
pub mod payment;

pub use inventory::{
    AlertSeverity, AlertStatus, ChangeKey, ChangeType, InventoryAlert, InventoryChange,
};
pub use order::{LineItem, Order, OrderStatus, StatusChange};
pub use payment::{PaymentMethod, PaymentStatus, PaymentTransaction, Refund, RefundStatus};
