//! The immutable event envelope and the closed set of event payloads.
//!
//! Every event on the bus is an [`Envelope`]: identity, timestamp and sender
//! wrapped around one [`EventPayload`] variant. The payload union is a tagged
//! enum (tag field `type`, value equal to the default routing key) rather
//! than an open inheritance hierarchy, so dispatch is a match on the kind.
//!
//! An envelope is never mutated after construction. Republishing an event
//! means building a new envelope with a fresh id.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Routing-key strings. Exact values are a configuration contract between
/// publisher and subscriber and must match verbatim.
pub mod routing {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_STATUS_CHANGED: &str = "order.status.changed";
    pub const PAYMENT_CREATED: &str = "payment.created";
    pub const PAYMENT_COMPLETED: &str = "payment.completed";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const INVENTORY_CHANGED: &str = "inventory.changed";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    id: Uuid,
    created_at: DateTime<Utc>,
    #[serde(default = "unknown_sender")]
    sender: String,
    #[serde(flatten)]
    payload: EventPayload,
}

fn unknown_sender() -> String {
    "unknown".to_string()
}

impl Envelope {
    pub fn new(sender: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            sender: sender.into(),
            payload,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Default routing key for this envelope: the payload kind.
    pub fn routing_key(&self) -> &'static str {
        self.payload.kind()
    }
}

/// Closed set of events the platform exchanges. The serde tag doubles as the
/// default routing key on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "order.created")]
    OrderCreated(OrderCreated),
    #[serde(rename = "order.status.changed")]
    OrderStatusChanged(OrderStatusChanged),
    #[serde(rename = "payment.created")]
    PaymentCreated(PaymentEvent),
    #[serde(rename = "payment.completed")]
    PaymentCompleted(PaymentEvent),
    #[serde(rename = "payment.failed")]
    PaymentFailed(PaymentEvent),
    #[serde(rename = "inventory.changed")]
    InventoryChanged(InventoryChanged),
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderCreated(_) => routing::ORDER_CREATED,
            Self::OrderStatusChanged(_) => routing::ORDER_STATUS_CHANGED,
            Self::PaymentCreated(_) => routing::PAYMENT_CREATED,
            Self::PaymentCompleted(_) => routing::PAYMENT_COMPLETED,
            Self::PaymentFailed(_) => routing::PAYMENT_FAILED,
            Self::InventoryChanged(_) => routing::INVENTORY_CHANGED,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    pub order_number: String,
    pub user_id: String,
    pub total_amount: Decimal,
    pub status: String,
    pub order_date: DateTime<Utc>,
    pub items: Vec<OrderLine>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChanged {
    pub order_id: String,
    pub order_number: String,
    pub user_id: String,
    pub old_status: String,
    pub new_status: String,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Shared shape of the payment lifecycle events; `external_reference` and
/// `error` are populated per kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub transaction_id: String,
    pub order_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub external_reference: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryChanged {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity_delta: i64,
    pub change_type: String,
    pub reference_id: String,
}
