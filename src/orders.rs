//! Order service messaging: product lookups, payment initiation, payment
//! status intake, and the downstream confirmation/seller fan-out.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::amqp::AmqpClient;
use crate::config::Config;
use crate::consumer::EventConsumer;
use crate::publisher::EventPublisher;
use crate::rpc::RpcClient;
use crate::topology::{ORDER_MAIL, ORDER_REQUEST_QUEUE, PAYMENT_STATUS, PRODUCT_REQUEST_QUEUE, SELLER_REQUEST_QUEUE};
use crate::types::{
    OrderCancellationData, OrderConfirmationData, OrderInput, OrderItem, OrderRecord,
    OrderRequest, OrderType, Payment, PaymentInitiation, PaymentStatus, PaymentStatusEvent,
    Product, ProductDetailsRequest, SellerOrderAck,
};

/// One line of a persisted order. Richer than the wire-level `OrderItem`:
/// the seller id is needed for the seller acknowledgment fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: String,
    pub seller_id: String,
    pub quantity: u32,
    pub product_price: f64,
}

/// Order persistence, implemented outside this crate.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, input: &OrderInput, products: &[Product]) -> Result<OrderRecord>;
    async fn update_payment_status(&self, payment: &Payment) -> Result<()>;
    async fn order_with_items(&self, order_id: &str) -> Result<(OrderRecord, Vec<OrderLine>)>;
    async fn cancel_order(&self, order_id: &str) -> Result<OrderRecord>;
}

pub struct OrderMessenger {
    rpc: RpcClient,
    publisher: EventPublisher,
    consumer: EventConsumer,
    store: Arc<dyn OrderStore>,
    order_link: String,
    support_link: String,
}

impl OrderMessenger {
    pub fn new(amqp: Arc<AmqpClient>, store: Arc<dyn OrderStore>, config: &Config) -> Self {
        OrderMessenger {
            rpc: RpcClient::new(
                amqp.clone(),
                Duration::from_secs(config.rpc_timeout_secs),
                config.rpc_pending_limit,
            ),
            publisher: EventPublisher::new(amqp.clone()),
            consumer: EventConsumer::new(amqp, config.max_delivery_attempts),
            store,
            order_link: config.order_link.clone(),
            support_link: config.support_link.clone(),
        }
    }

    /// The order placement workflow: resolve products, persist the order as
    /// PENDING, then ask the payment service to start a payment. Nothing is
    /// persisted when any product is missing; a failure after creation
    /// leaves the order PENDING until a terminal payment event arrives.
    pub async fn place_order(&self, input: OrderInput) -> Result<OrderRecord> {
        let product_ids: Vec<String> = input
            .order_items
            .iter()
            .map(|item| item.product_id.clone())
            .collect();

        let products = self.request_product_details(&product_ids).await?;
        for id in &product_ids {
            if !products.iter().any(|p| p.product_id == *id) {
                bail!("Product '{}' not found", id);
            }
        }

        let order = self.store.create_order(&input, &products).await?;
        tracing::info!("Order {} created for user {}", order.order_id, order.user_id);

        self.request_payment_initiation(&PaymentInitiation {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            total_amount: order.total_amount,
        })
        .await?;

        Ok(order)
    }

    /// Cancels an order and tells the notification service about it.
    pub async fn cancel_order(&self, order_id: &str) -> Result<OrderRecord> {
        let cancelled = self.store.cancel_order(order_id).await?;

        self.request_order_confirmation_mail(&OrderRequest {
            kind: OrderType::Cancellation,
            confirmation_data: None,
            cancellation_data: Some(OrderCancellationData {
                user_id: cancelled.user_id.clone(),
                order_id: cancelled.order_id.clone(),
                reason: "Order Successfully Cancelled !".to_string(),
                support_link: self.support_link.clone(),
            }),
        })
        .await?;

        Ok(cancelled)
    }

    /// Fetches product details from the product service over request/reply.
    pub async fn request_product_details(&self, product_ids: &[String]) -> Result<Vec<Product>> {
        let request = ProductDetailsRequest {
            product_ids: product_ids.to_vec(),
        };
        let products: Vec<Product> = self.rpc.request(PRODUCT_REQUEST_QUEUE, &request).await?;
        tracing::info!("Received {} product records", products.len());
        Ok(products)
    }

    pub async fn request_payment_initiation(&self, request: &PaymentInitiation) -> Result<()> {
        self.publisher.send_to_queue(ORDER_REQUEST_QUEUE, request).await?;
        tracing::info!("Payment initiation requested for order {}", request.order_id);
        Ok(())
    }

    pub async fn request_order_confirmation_mail(&self, request: &OrderRequest) -> Result<()> {
        self.publisher.publish(&ORDER_MAIL, request).await
    }

    /// Tells every seller with a line in the order that it is theirs to
    /// fulfil.
    pub async fn request_seller_ack(&self, order_id: &str) -> Result<()> {
        let (order, lines) = self.store.order_with_items(order_id).await?;

        let acks: Vec<SellerOrderAck> = lines
            .iter()
            .map(|line| SellerOrderAck {
                seller_id: line.seller_id.clone(),
                order_id: order.order_id.clone(),
            })
            .collect();

        self.publisher.send_to_queue(SELLER_REQUEST_QUEUE, &acks).await?;
        tracing::info!("Seller acknowledgment sent for order {}", order.order_id);
        Ok(())
    }

    /// Consumes payment status events from the payment service.
    pub async fn listen_for_payment_updates(self: Arc<Self>) -> Result<()> {
        let messenger = Arc::clone(&self);
        self.consumer
            .bind_topic(&PAYMENT_STATUS, move |event: PaymentStatusEvent| {
                let messenger = Arc::clone(&messenger);
                async move { messenger.handle_payment_update(event).await }
            })
            .await
    }

    async fn handle_payment_update(&self, event: PaymentStatusEvent) -> Result<()> {
        tracing::info!(
            "Received payment status {:?} for order {}",
            event.kind,
            event.data.order_id
        );

        // Terminal and intermediate statuses alike are persisted; an event
        // for an order the store does not know yet is a handler error and
        // re-enters the bounded retry path.
        self.store.update_payment_status(&event.data).await?;

        if event.kind == PaymentStatus::Success {
            let (order, lines) = self.store.order_with_items(&event.data.order_id).await?;
            self.request_order_confirmation_mail(&confirmation_request(&order, &lines, &self.order_link))
                .await?;
            self.request_seller_ack(&order.order_id).await?;
        }

        Ok(())
    }
}

fn confirmation_request(order: &OrderRecord, lines: &[OrderLine], order_link: &str) -> OrderRequest {
    let order_items = lines
        .iter()
        .map(|line| OrderItem {
            product_id: line.product_id.clone(),
            quantity: line.quantity,
            product_price: line.product_price,
        })
        .collect();

    OrderRequest {
        kind: OrderType::Confirmation,
        confirmation_data: Some(OrderConfirmationData {
            user_id: order.user_id.clone(),
            order_id: order.order_id.clone(),
            order_date: order.created_at,
            order_items,
            total_amount: order.total_amount,
            order_link: order_link.to_string(),
        }),
        cancellation_data: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn order() -> OrderRecord {
        OrderRecord {
            order_id: "o-42".to_string(),
            user_id: "u-7".to_string(),
            total_amount: 1498.0,
            created_at: Utc::now(),
            payment_status: PaymentStatus::Pending,
        }
    }

    #[test]
    fn confirmation_request_carries_the_order_lines() {
        let lines = vec![
            OrderLine {
                product_id: "p-1".to_string(),
                seller_id: "s-1".to_string(),
                quantity: 1,
                product_price: 999.0,
            },
            OrderLine {
                product_id: "p-2".to_string(),
                seller_id: "s-2".to_string(),
                quantity: 1,
                product_price: 499.0,
            },
        ];

        let request = confirmation_request(&order(), &lines, "http://shopxindia.shop/orders");

        assert_eq!(request.kind, OrderType::Confirmation);
        assert!(request.cancellation_data.is_none());

        let data = request.confirmation_data.expect("confirmation data");
        assert_eq!(data.order_id, "o-42");
        assert_eq!(data.total_amount, 1498.0);
        assert_eq!(data.order_link, "http://shopxindia.shop/orders");
        assert_eq!(data.order_items.len(), 2);
        assert_eq!(data.order_items[0].product_id, "p-1");
    }
}
