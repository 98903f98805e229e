//! Seller service messaging: order acknowledgment intake.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::amqp::AmqpClient;
use crate::config::Config;
use crate::consumer::EventConsumer;
use crate::topology::SELLER_REQUEST_QUEUE;
use crate::types::SellerOrderAck;

/// Seller-side order bookkeeping, implemented outside this crate.
#[async_trait]
pub trait SellerOrders: Send + Sync {
    async fn record_order(&self, ack: &SellerOrderAck) -> Result<()>;
}

pub struct SellerMessenger {
    consumer: EventConsumer,
    orders: Arc<dyn SellerOrders>,
}

impl SellerMessenger {
    pub fn new(amqp: Arc<AmqpClient>, orders: Arc<dyn SellerOrders>, config: &Config) -> Self {
        SellerMessenger {
            consumer: EventConsumer::new(amqp, config.max_delivery_attempts),
            orders,
        }
    }

    /// Consumes the per-item acknowledgments the order service sends after
    /// a successful payment.
    pub async fn listen_for_order_acks(self: Arc<Self>) -> Result<()> {
        let messenger = Arc::clone(&self);
        self.consumer
            .bind_queue(SELLER_REQUEST_QUEUE, move |acks: Vec<SellerOrderAck>| {
                let messenger = Arc::clone(&messenger);
                async move {
                    for ack in &acks {
                        messenger.orders.record_order(ack).await?;
                        tracing::info!(
                            "Order {} recorded for seller {}",
                            ack.order_id,
                            ack.seller_id
                        );
                    }
                    Ok(())
                }
            })
            .await
    }
}
