//! Error taxonomy shared by the services, the messaging layer and the HTTP
//! boundary.
//!
//! Three families matter operationally: transient failures (broker or store
//! unreachable, lost concurrent write) which a caller may retry, domain
//! invariant violations which retrying can never fix, and everything else,
//! which the message layer treats as a handler bug and redelivers up to its
//! attempt ceiling.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("refund amount {requested} exceeds refundable balance {refundable}")]
    InsufficientRefundableAmount {
        requested: Decimal,
        refundable: Decimal,
    },

    #[error("concurrent update conflict")]
    ConcurrencyConflict,

    /// A payload of the wrong kind arrived on a queue: a broker-binding
    /// misconfiguration. Not a domain violation, so dispatch does not ack
    /// it; the message ends up on the dead-letter queue for inspection.
    #[error("misrouted message: {0}")]
    Misrouted(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Failures a caller (or the broker's redelivery policy) may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BrokerUnavailable(_) | Self::Storage(_) | Self::ConcurrencyConflict
        )
    }

    /// Domain invariant violations. Redelivering a message that tripped one
    /// of these cannot change the outcome, so the registry acknowledges it.
    pub fn is_domain_violation(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Validation(_)
                | Self::InvalidTransition { .. }
                | Self::InvalidOperation(_)
                | Self::InvalidState(_)
                | Self::InsufficientRefundableAmount { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
