//! Payment service: transaction and refund lifecycles plus event publication.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::domain::payment::{PaymentTransaction, Refund};
use crate::error::{Error, Result};
use crate::messaging::bus::MessageBus;
use crate::messaging::envelope::{Envelope, EventPayload, PaymentEvent};
use crate::store::PaymentStore;

/// Result of the (external) provider call for a pending transaction.
#[derive(Clone, Debug)]
pub enum PaymentOutcome {
    Success { external_reference: String },
    Failure { error: String },
}

#[derive(Clone, Debug)]
pub struct CreatePayment {
    pub order_id: String,
    pub user_id: String,
    pub payment_method_id: String,
    pub amount: Decimal,
    pub currency: String,
}

pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    bus: Arc<dyn MessageBus>,
    service_name: String,
}

impl PaymentService {
    pub fn new(store: Arc<dyn PaymentStore>, bus: Arc<dyn MessageBus>, service_name: &str) -> Self {
        Self {
            store,
            bus,
            service_name: service_name.to_string(),
        }
    }

    pub async fn create_payment(&self, request: CreatePayment) -> Result<PaymentTransaction> {
        let method = self.store.get_method(&request.payment_method_id).await?;
        if !method.active {
            return Err(Error::Validation(format!(
                "payment method {} is not active",
                method.id
            )));
        }
        if method.user_id != request.user_id {
            return Err(Error::Validation(format!(
                "payment method {} does not belong to user {}",
                method.id, request.user_id
            )));
        }

        let transaction = PaymentTransaction::create(
            request.order_id,
            request.user_id,
            request.payment_method_id,
            request.amount,
            request.currency,
        )?;
        self.store.insert_transaction(transaction.clone()).await?;

        let envelope = self.payment_envelope(&transaction, |e| EventPayload::PaymentCreated(e));
        if let Err(e) = self.bus.publish_event(&envelope).await {
            tracing::warn!(transaction_id = transaction.id(), error = %e, "publish failed, rolling back payment creation");
            self.store.delete_transaction(transaction.id()).await?;
            return Err(e);
        }
        tracing::info!(transaction_id = transaction.id(), "payment transaction created");
        Ok(transaction)
    }

    /// Drives a pending transaction to its terminal status. Invoking this on
    /// an already-terminal transaction fails instead of re-processing.
    pub async fn process_payment(
        &self,
        transaction_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<PaymentTransaction> {
        let mut transaction = self.store.get_transaction(transaction_id).await?;
        let previous = transaction.clone();

        let envelope = match &outcome {
            PaymentOutcome::Success { external_reference } => {
                transaction.complete(external_reference.clone())?;
                self.payment_envelope(&transaction, |e| EventPayload::PaymentCompleted(e))
            }
            PaymentOutcome::Failure { error } => {
                transaction.fail(error.clone())?;
                self.payment_envelope(&transaction, |e| EventPayload::PaymentFailed(e))
            }
        };

        self.store.update_transaction(&transaction).await?;
        if let Err(e) = self.bus.publish_event(&envelope).await {
            tracing::warn!(transaction_id, error = %e, "publish failed, rolling back payment processing");
            self.store.restore_transaction(previous).await?;
            return Err(e);
        }
        tracing::info!(transaction_id, status = %transaction.status(), "payment processed");
        Ok(transaction)
    }

    pub async fn get_transaction(&self, transaction_id: &str) -> Result<PaymentTransaction> {
        self.store.get_transaction(transaction_id).await
    }

    /// Validates the refundable balance against all prior non-failed
    /// refunds. The insert is guarded by the transaction's version, so two
    /// concurrent refunds validated against the same balance cannot both
    /// land; the loser gets a retryable `ConcurrencyConflict`.
    pub async fn create_refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Refund> {
        let mut transaction = self.store.get_transaction(transaction_id).await?;
        let prior = self.store.refunds_for_transaction(transaction_id).await?;
        let refund = Refund::create(&transaction, &prior, amount, reason)?;
        transaction.reserve_refund();
        self.store.insert_refund(refund.clone(), &transaction).await?;
        tracing::info!(refund_id = refund.id(), transaction_id, "refund created");
        Ok(refund)
    }

    pub async fn process_refund(&self, refund_id: &str, success: bool) -> Result<Refund> {
        let mut refund = self.store.get_refund(refund_id).await?;
        refund.process(success)?;
        self.store.update_refund(&refund).await?;
        tracing::info!(refund_id, success, "refund processed");
        Ok(refund)
    }

    fn payment_envelope(
        &self,
        transaction: &PaymentTransaction,
        wrap: impl Fn(PaymentEvent) -> EventPayload,
    ) -> Envelope {
        Envelope::new(
            &self.service_name,
            wrap(PaymentEvent {
                transaction_id: transaction.id().to_string(),
                order_id: transaction.order_id().to_string(),
                user_id: transaction.user_id().to_string(),
                amount: transaction.amount(),
                currency: transaction.currency().to_string(),
                external_reference: transaction.external_reference().map(str::to_string),
                error: transaction.error_message().map(str::to_string),
            }),
        )
    }
}
