use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};
use anyhow::{Context, Result};

/// Exchange flavours used by the ShopX workflows. Fanout exchanges ignore
/// routing keys and deliver to every bound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Fanout,
}

impl ExchangeType {
    fn as_lapin(self) -> ExchangeKind {
        match self {
            ExchangeType::Direct => ExchangeKind::Direct,
            ExchangeType::Fanout => ExchangeKind::Fanout,
        }
    }
}

/// One row of the fixed routing table shared by all services. Exchange,
/// queue, and binding are always declared durable; declaring the same name
/// twice with identical parameters is a no-op, with conflicting parameters
/// a broker error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topic {
    pub exchange: &'static str,
    pub exchange_type: ExchangeType,
    pub queue: &'static str,
    pub routing_key: &'static str,
}

/// OTP delivery, broadcast from the user service to every listener.
pub const OTP_BROADCAST: Topic = Topic {
    exchange: "user.request",
    exchange_type: ExchangeType::Fanout,
    queue: "user_request_queue",
    routing_key: "",
};

/// Payment confirmation/cancellation mail requests to the notification service.
pub const PAYMENT_MAIL: Topic = Topic {
    exchange: "payment.request",
    exchange_type: ExchangeType::Direct,
    queue: "payment_mail_queue",
    routing_key: "payment_confirmation",
};

/// Order confirmation/cancellation mail requests to the notification service.
pub const ORDER_MAIL: Topic = Topic {
    exchange: "order.request",
    exchange_type: ExchangeType::Direct,
    queue: "order_confirmation_queue",
    routing_key: "order.confirmation",
};

/// Low-stock notices from the product service to the notification service.
pub const LOW_STOCK: Topic = Topic {
    exchange: "product.request",
    exchange_type: ExchangeType::Direct,
    queue: "product_queue",
    routing_key: "product_quantity_less",
};

/// Payment status events from the payment service back to the order service.
pub const PAYMENT_STATUS: Topic = Topic {
    exchange: "payment_exchange",
    exchange_type: ExchangeType::Direct,
    queue: "payment_order_queue",
    routing_key: "payment_status",
};

pub const ALL_TOPICS: [Topic; 5] = [
    OTP_BROADCAST,
    PAYMENT_MAIL,
    ORDER_MAIL,
    LOW_STOCK,
    PAYMENT_STATUS,
];

// Queue-only workflows: requests go to the default exchange with the queue
// name as routing key.
pub const USER_DETAILS_QUEUE: &str = "user.details.request";
pub const PRODUCT_REQUEST_QUEUE: &str = "product_request_queue";
pub const ORDER_REQUEST_QUEUE: &str = "order_request_queue";
pub const SELLER_REQUEST_QUEUE: &str = "seller_request_queue";

// Exhausted and unparseable deliveries end up here, tagged with their
// origin queue as routing key. The exchange is fanout so no per-queue
// binding table is needed.
pub const DEAD_LETTER_EXCHANGE: &str = "shopx.dead_letter";
pub const DEAD_LETTER_QUEUE: &str = "dead_letter_queue";

/// Asserts exchange, queue, and binding for a workflow topic.
pub async fn declare_topic(channel: &Channel, topic: &Topic) -> Result<()> {
    channel
        .exchange_declare(
            topic.exchange,
            topic.exchange_type.as_lapin(),
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare exchange '{}'", topic.exchange))?;

    channel
        .queue_declare(
            topic.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare queue '{}'", topic.queue))?;

    channel
        .queue_bind(
            topic.queue,
            topic.exchange,
            topic.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .with_context(|| {
            format!(
                "Failed to bind queue '{}' to exchange '{}'",
                topic.queue, topic.exchange
            )
        })?;

    Ok(())
}

/// Asserts a durable queue served through the default exchange.
pub async fn declare_work_queue(channel: &Channel, queue: &str) -> Result<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare queue '{}'", queue))?;

    Ok(())
}

pub async fn declare_dead_letter(channel: &Channel) -> Result<()> {
    channel
        .exchange_declare(
            DEAD_LETTER_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare dead letter exchange")?;

    channel
        .queue_declare(
            DEAD_LETTER_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare dead letter queue")?;

    channel
        .queue_bind(
            DEAD_LETTER_QUEUE,
            DEAD_LETTER_EXCHANGE,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to bind dead letter queue")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn every_queue_has_a_single_owner_topic() {
        let mut seen: HashMap<&str, &Topic> = HashMap::new();
        for topic in ALL_TOPICS.iter() {
            assert!(
                seen.insert(topic.queue, topic).is_none(),
                "queue '{}' is declared by more than one topic",
                topic.queue
            );
        }
    }

    #[test]
    fn fanout_topics_use_an_empty_routing_key() {
        for topic in ALL_TOPICS.iter() {
            match topic.exchange_type {
                ExchangeType::Fanout => assert!(
                    topic.routing_key.is_empty(),
                    "fanout topic '{}' must not carry a routing key",
                    topic.exchange
                ),
                ExchangeType::Direct => assert!(
                    !topic.routing_key.is_empty(),
                    "direct topic '{}' needs a routing key",
                    topic.exchange
                ),
            }
        }
    }

    #[test]
    fn work_queues_do_not_collide_with_topic_queues() {
        let work_queues = [
            USER_DETAILS_QUEUE,
            PRODUCT_REQUEST_QUEUE,
            ORDER_REQUEST_QUEUE,
            SELLER_REQUEST_QUEUE,
            DEAD_LETTER_QUEUE,
        ];
        for queue in work_queues {
            assert!(
                ALL_TOPICS.iter().all(|t| t.queue != queue),
                "queue '{}' is both a work queue and a topic queue",
                queue
            );
        }
    }
}
