//! Payment service messaging: order request intake, payment status events
//! back to the order service, and payment mail requests.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use nanoid::nanoid;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::amqp::AmqpClient;
use crate::config::Config;
use crate::consumer::EventConsumer;
use crate::publisher::EventPublisher;
use crate::topology::{ORDER_REQUEST_QUEUE, PAYMENT_MAIL, PAYMENT_STATUS};
use crate::types::{
    Payment, PaymentInitiation, PaymentMailRequest, PaymentMailType, PaymentStatus,
    PaymentStatusEvent,
};

/// A payment as the payment service persists it. The one-time code is
/// short-lived; validation happens outside the messaging core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub payment_id: String,
    pub order_id: String,
    pub user_id: String,
    pub amount: f64,
}

/// Payment persistence and code issuance, implemented outside this crate.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn initiate(&self, request: &PaymentInitiation) -> Result<PaymentRecord>;
}

pub struct PaymentMessenger {
    publisher: EventPublisher,
    consumer: EventConsumer,
    processor: Arc<dyn PaymentProcessor>,
    receipt_link: String,
    support_link: String,
}

impl PaymentMessenger {
    pub fn new(amqp: Arc<AmqpClient>, processor: Arc<dyn PaymentProcessor>, config: &Config) -> Self {
        PaymentMessenger {
            publisher: EventPublisher::new(amqp.clone()),
            consumer: EventConsumer::new(amqp, config.max_delivery_attempts),
            processor,
            receipt_link: config.receipt_link.clone(),
            support_link: config.support_link.clone(),
        }
    }

    /// Consumes payment initiation requests from the order service; each
    /// one starts a payment and reports PENDING back.
    pub async fn listen_for_order_requests(self: Arc<Self>) -> Result<()> {
        let messenger = Arc::clone(&self);
        self.consumer
            .bind_queue(ORDER_REQUEST_QUEUE, move |request: PaymentInitiation| {
                let messenger = Arc::clone(&messenger);
                async move { messenger.handle_order_request(request).await }
            })
            .await
    }

    async fn handle_order_request(&self, request: PaymentInitiation) -> Result<()> {
        let payment = self.processor.initiate(&request).await?;
        tracing::info!(
            "Payment {} initiated for order {}",
            payment.payment_id,
            payment.order_id
        );

        self.respond_payment_status(&status_event(&payment, PaymentStatus::Pending))
            .await
    }

    /// Reports the outcome of a code validation: the order service gets a
    /// terminal status event, the notification service a matching mail
    /// request.
    pub async fn report_payment_outcome(&self, payment: &PaymentRecord, success: bool) -> Result<()> {
        let status = if success {
            PaymentStatus::Success
        } else {
            PaymentStatus::Failed
        };

        self.respond_payment_status(&status_event(payment, status)).await?;
        self.request_payment_confirmation_mail(&self.outcome_mail(payment, success))
            .await?;

        Ok(())
    }

    pub async fn respond_payment_status(&self, event: &PaymentStatusEvent) -> Result<()> {
        self.publisher.publish(&PAYMENT_STATUS, event).await?;
        tracing::info!(
            "Payment status {:?} sent for order {}",
            event.kind,
            event.data.order_id
        );
        Ok(())
    }

    pub async fn request_payment_confirmation_mail(&self, request: &PaymentMailRequest) -> Result<()> {
        self.publisher.publish(&PAYMENT_MAIL, request).await
    }

    fn outcome_mail(&self, payment: &PaymentRecord, success: bool) -> PaymentMailRequest {
        PaymentMailRequest {
            kind: if success {
                PaymentMailType::Confirmation
            } else {
                PaymentMailType::Cancellation
            },
            order_id: payment.order_id.clone(),
            user_id: payment.user_id.clone(),
            amount: payment.amount,
            receipt_link: Some(self.receipt_link.clone()),
            retry_payment_link: Some(self.receipt_link.clone()),
            support_link: Some(self.support_link.clone()),
        }
    }
}

fn status_event(payment: &PaymentRecord, status: PaymentStatus) -> PaymentStatusEvent {
    PaymentStatusEvent {
        kind: status,
        data: Payment {
            payment_id: payment.payment_id.clone(),
            order_id: payment.order_id.clone(),
            payment_status: status,
        },
    }
}

/// Public payment id, short enough for receipts.
pub fn new_payment_id() -> String {
    format!("pay_{}", nanoid!(12))
}

/// Six-digit one-time code handed to the buyer.
pub fn one_time_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999u32).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> PaymentRecord {
        PaymentRecord {
            payment_id: "pay_abc123".to_string(),
            order_id: "o-1".to_string(),
            user_id: "u-1".to_string(),
            amount: 750.0,
        }
    }

    #[test]
    fn status_events_mirror_the_status_in_both_fields() {
        let event = status_event(&payment(), PaymentStatus::Success);
        assert_eq!(event.kind, PaymentStatus::Success);
        assert_eq!(event.data.payment_status, PaymentStatus::Success);
        assert_eq!(event.data.order_id, "o-1");
    }

    #[test]
    fn one_time_codes_are_six_digits() {
        for _ in 0..100 {
            let code = one_time_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn payment_ids_carry_the_public_prefix() {
        let id = new_payment_id();
        assert!(id.starts_with("pay_"));
        assert_eq!(id.len(), "pay_".len() + 12);
    }
}
