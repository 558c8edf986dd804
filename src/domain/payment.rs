//! Payment transaction and refund state machines.
//!
//! A transaction starts `pending` and moves exactly once to a terminal
//! status; `completed_at` is set if and only if the status is terminal.
//! Refunds against a transaction may never exceed the transaction amount
//! minus all prior non-failed refunds.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Stored payment instrument; only active methods can fund a transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    pub user_id: String,
    pub method_type: String,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentTransaction {
    id: String,
    order_id: String,
    user_id: String,
    payment_method_id: String,
    amount: Decimal,
    currency: String,
    status: PaymentStatus,
    external_reference: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
}

impl PaymentTransaction {
    pub fn create(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        payment_method_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Result<Self> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(
                "payment amount must be positive".into(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.into(),
            user_id: user_id.into(),
            payment_method_id: payment_method_id.into(),
            amount,
            currency: currency.into(),
            status: PaymentStatus::Pending,
            external_reference: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            version: 1,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn payment_method_id(&self) -> &str {
        &self.payment_method_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn external_reference(&self) -> Option<&str> {
        self.external_reference.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn require_pending(&self) -> Result<()> {
        if self.status != PaymentStatus::Pending {
            return Err(Error::InvalidState(format!(
                "transaction {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn complete(&mut self, external_reference: impl Into<String>) -> Result<()> {
        self.require_pending()?;
        self.status = PaymentStatus::Completed;
        self.external_reference = Some(external_reference.into());
        self.completed_at = Some(Utc::now());
        self.version += 1;
        Ok(())
    }

    pub fn fail(&mut self, error_message: impl Into<String>) -> Result<()> {
        self.require_pending()?;
        self.status = PaymentStatus::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(Utc::now());
        self.version += 1;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.require_pending()?;
        self.status = PaymentStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.version += 1;
        Ok(())
    }

    /// Marks the refundable balance read as consumed by a refund about to
    /// be written. The version bump makes two concurrent reservations
    /// collide in the store's optimistic check, so at most one lands.
    pub fn reserve_refund(&mut self) {
        self.version += 1;
    }

    /// Amount still open for refunding: the transaction amount minus every
    /// prior refund that has not failed.
    pub fn refundable_amount(&self, refunds: &[Refund]) -> Decimal {
        let reserved: Decimal = refunds
            .iter()
            .filter(|r| r.status() != RefundStatus::Failed)
            .map(Refund::amount)
            .sum();
        self.amount - reserved
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Refund {
    id: String,
    payment_transaction_id: String,
    amount: Decimal,
    status: RefundStatus,
    reason: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl Refund {
    /// Validates the refund against the transaction and all prior refunds.
    pub fn create(
        transaction: &PaymentTransaction,
        prior_refunds: &[Refund],
        amount: Decimal,
        reason: impl Into<String>,
    ) -> Result<Self> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation("refund amount must be positive".into()));
        }
        if transaction.status() != PaymentStatus::Completed {
            return Err(Error::InvalidState(format!(
                "transaction {} is {} and cannot be refunded",
                transaction.id(),
                transaction.status()
            )));
        }
        let refundable = transaction.refundable_amount(prior_refunds);
        if amount > refundable {
            return Err(Error::InsufficientRefundableAmount {
                requested: amount,
                refundable,
            });
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            payment_transaction_id: transaction.id().to_string(),
            amount,
            status: RefundStatus::Pending,
            reason: reason.into(),
            created_at: Utc::now(),
            processed_at: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payment_transaction_id(&self) -> &str {
        &self.payment_transaction_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn status(&self) -> RefundStatus {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    /// A refund never partially succeeds: the supplied flag decides the
    /// terminal status in one step.
    pub fn process(&mut self, success: bool) -> Result<()> {
        if self.status != RefundStatus::Pending {
            return Err(Error::InvalidState(format!(
                "refund {} has already been processed",
                self.id
            )));
        }
        self.status = if success {
            RefundStatus::Completed
        } else {
            RefundStatus::Failed
        };
        self.processed_at = Some(Utc::now());
        Ok(())
    }
}
