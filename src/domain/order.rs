//! Order aggregate and its status state machine.
//!
//! Allowed transitions: Created → Paid → Shipped → Delivered, with Cancelled
//! reachable from Created or Paid only. Every successful transition appends
//! to the order's status history; the history is never edited, and the
//! current status always equals the last entry's `to`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        Self::Created,
        Self::Paid,
        Self::Shipped,
        Self::Delivered,
        Self::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// The closed edge set of the lifecycle.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Created, Paid)
                | (Paid, Shipped)
                | (Shipped, Delivered)
                | (Created, Cancelled)
                | (Paid, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "paid" => Ok(Self::Paid),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::Validation(format!("unknown order status: {other}"))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// One append-only history entry per successful transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: String,
    order_number: String,
    user_id: String,
    status: OrderStatus,
    items: Vec<LineItem>,
    total_amount: Decimal,
    order_date: DateTime<Utc>,
    history: Vec<StatusChange>,
    version: u64,
}

impl Order {
    pub fn create(user_id: impl Into<String>, items: Vec<LineItem>) -> Result<Self> {
        if items.is_empty() {
            return Err(Error::Validation(
                "order must contain at least one line item".into(),
            ));
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(Error::Validation(format!(
                    "line item {} has zero quantity",
                    item.product_id
                )));
            }
            if item.unit_price < Decimal::ZERO {
                return Err(Error::Validation(format!(
                    "line item {} has a negative unit price",
                    item.product_id
                )));
            }
        }
        let total_amount = items.iter().map(LineItem::subtotal).sum();
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            order_number: format!("ORD-{:08}", rand::random::<u32>() % 100_000_000),
            user_id: user_id.into(),
            status: OrderStatus::Created,
            items,
            total_amount,
            order_date: now,
            // Seed entry so the history always closes on the current status.
            history: vec![StatusChange {
                from: OrderStatus::Created,
                to: OrderStatus::Created,
                at: now,
                actor: "system".into(),
                reason: Some("order created".into()),
            }],
            version: 1,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Applies a legal transition, appends history and bumps the version.
    pub fn transition(
        &mut self,
        to: OrderStatus,
        actor: &str,
        reason: Option<String>,
    ) -> Result<StatusChange> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let change = StatusChange {
            from: self.status,
            to,
            at: Utc::now(),
            actor: actor.to_string(),
            reason,
        };
        self.status = to;
        self.history.push(change.clone());
        self.version += 1;
        Ok(change)
    }

    /// Cancel is rejected outright once the order is shipped or delivered.
    pub fn cancel(&mut self, actor: &str, reason: Option<String>) -> Result<StatusChange> {
        if matches!(self.status, OrderStatus::Shipped | OrderStatus::Delivered) {
            return Err(Error::InvalidOperation(format!(
                "cannot cancel an order already {}",
                self.status
            )));
        }
        self.transition(OrderStatus::Cancelled, actor, reason)
    }
}
