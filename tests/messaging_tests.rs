//! Live-broker integration tests.
//!
//! These need a reachable RabbitMQ (RABBITMQ_URL, default amqp://localhost)
//! and are ignored otherwise: run them with `cargo test -- --ignored`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use dotenv::dotenv;
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use serde_json::{json, Value};
use uuid::Uuid;

use shopx::config::Config;
use shopx::products::{ProductCatalog, ProductMessenger};
use shopx::topology::{DEAD_LETTER_QUEUE, OTP_BROADCAST, PRODUCT_REQUEST_QUEUE};
use shopx::types::{OtpRequest, Product, ProductDetailsRequest, UserDetails};
use shopx::users::{generate_otp, UserDirectory, UserMessenger};
use shopx::{AmqpClient, EventConsumer, EventPublisher, RpcClient};

fn test_config() -> Config {
    dotenv().ok();
    Config::from_env().expect("Failed to read configuration")
}

fn unique_queue(prefix: &str) -> &'static str {
    Box::leak(format!("{}.{}", prefix, Uuid::new_v4()).into_boxed_str())
}

struct TwoProductCatalog;

#[async_trait]
impl ProductCatalog for TwoProductCatalog {
    async fn products_by_ids(&self, ids: &[String]) -> Result<Vec<Product>> {
        Ok(ids
            .iter()
            .map(|id| Product {
                product_id: id.clone(),
                product_name: format!("Product {}", id),
                description: "Integration fixture".to_string(),
                product_price: 100.0,
                discounted_price: 90.0,
                stock: 10,
                availability: true,
                seller_id: "s-1".to_string(),
            })
            .collect())
    }
}

struct SingleUserDirectory;

#[async_trait]
impl UserDirectory for SingleUserDirectory {
    async fn user_details(&self, user_id: &str) -> Result<UserDetails> {
        if user_id != "u-1" {
            bail!("Unknown user '{}'", user_id);
        }
        Ok(UserDetails {
            user_id: "u-1".to_string(),
            first_name: "Asha".to_string(),
            last_name: "Verma".to_string(),
            email: "asha@example.com".to_string(),
            phone_no: "+911234567890".to_string(),
            addresses: vec![],
        })
    }
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ"]
async fn product_lookup_resolves_over_request_reply() {
    let config = test_config();
    let amqp = Arc::new(AmqpClient::new(&config.rabbitmq_url));

    let messenger = Arc::new(ProductMessenger::new(
        amqp.clone(),
        Arc::new(TwoProductCatalog),
        &config,
    ));
    messenger
        .serve_product_requests()
        .await
        .expect("Failed to start the product endpoint");

    let rpc = RpcClient::new(amqp.clone(), Duration::from_secs(10), 16);
    let request = ProductDetailsRequest {
        product_ids: vec!["p1".to_string(), "p2".to_string()],
    };
    let products: Vec<Product> = rpc
        .request(PRODUCT_REQUEST_QUEUE, &request)
        .await
        .expect("Product lookup failed");

    assert_eq!(products.len(), 2);
    assert_eq!(products[0].product_id, "p1");
    assert_eq!(products[1].product_id, "p2");

    amqp.disconnect().await.expect("Failed to disconnect");
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ"]
async fn fanout_reaches_every_bound_queue() {
    let config = test_config();
    let amqp = Arc::new(AmqpClient::new(&config.rabbitmq_url));
    let channel = amqp.ensure_channel().await.expect("Failed to open channel");

    // Two extra listeners beside the regular notification queue.
    let mut consumers = Vec::new();
    for _ in 0..2 {
        let queue = channel
            .queue_declare(
                unique_queue("it.fanout"),
                QueueDeclareOptions {
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .expect("Failed to declare fanout listener");
        channel
            .queue_bind(
                queue.name().as_str(),
                OTP_BROADCAST.exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .expect("Failed to bind fanout listener");
        let consumer = channel
            .basic_consume(
                queue.name().as_str(),
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .expect("Failed to consume fanout listener");
        consumers.push(consumer);
    }

    let messenger = UserMessenger::new(amqp.clone(), Arc::new(SingleUserDirectory), &config);
    messenger
        .request_otp(&OtpRequest {
            user_id: "u-1".to_string(),
            first_name: "Asha".to_string(),
            last_name: "Verma".to_string(),
            email: "asha@example.com".to_string(),
            phone_no: "+911234567890".to_string(),
            email_otp: generate_otp(),
            sms_otp: generate_otp(),
        })
        .await
        .expect("Failed to broadcast the OTP request");

    for mut consumer in consumers {
        let delivery = tokio::time::timeout(Duration::from_secs(5), consumer.next())
            .await
            .expect("No fanout delivery within 5s")
            .expect("Consumer stream ended")
            .expect("Broken delivery");
        let request: OtpRequest =
            serde_json::from_slice(&delivery.data).expect("Unparseable OTP request");
        assert_eq!(request.user_id, "u-1");
        delivery
            .ack(BasicAckOptions::default())
            .await
            .expect("Failed to ack");
    }

    amqp.disconnect().await.expect("Failed to disconnect");
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ"]
async fn a_queue_delivers_in_publish_order() {
    let config = test_config();
    let amqp = Arc::new(AmqpClient::new(&config.rabbitmq_url));
    let queue = unique_queue("it.ordering");

    let publisher = EventPublisher::new(amqp.clone());
    publisher
        .send_to_queue(queue, &json!({ "n": 1 }))
        .await
        .expect("Failed to publish P1");
    publisher
        .send_to_queue(queue, &json!({ "n": 2 }))
        .await
        .expect("Failed to publish P2");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let consumer = EventConsumer::new(amqp.clone(), config.max_delivery_attempts);
    consumer
        .bind_queue(queue, move |payload: Value| {
            let tx = tx.clone();
            async move {
                tx.send(payload).map_err(|e| anyhow!("Receiver gone: {}", e))
            }
        })
        .await
        .expect("Failed to bind the ordering queue");

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("No first delivery within 5s")
        .expect("Channel closed");
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("No second delivery within 5s")
        .expect("Channel closed");

    assert_eq!(first["n"], 1);
    assert_eq!(second["n"], 2);

    amqp.disconnect().await.expect("Failed to disconnect");
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ"]
async fn a_failing_handler_is_retried_then_dead_lettered() {
    let mut config = test_config();
    config.max_delivery_attempts = 2;

    let amqp = Arc::new(AmqpClient::new(&config.rabbitmq_url));
    let queue = unique_queue("it.poison");
    let marker = Uuid::new_v4().to_string();

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let consumer = EventConsumer::new(amqp.clone(), config.max_delivery_attempts);
    consumer
        .bind_queue(queue, move |_payload: Value| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                bail!("Handler never succeeds")
            }
        })
        .await
        .expect("Failed to bind the poison queue");

    let publisher = EventPublisher::new(amqp.clone());
    publisher
        .send_to_queue(queue, &json!({ "marker": marker }))
        .await
        .expect("Failed to publish the poison message");

    // Drain the dead letter queue until our marker shows up.
    let channel = amqp.ensure_channel().await.expect("Failed to open channel");
    let mut dead_letters = channel
        .basic_consume(
            DEAD_LETTER_QUEUE,
            "",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .expect("Failed to consume the dead letter queue");

    let found = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(delivery) = dead_letters.next().await {
            let delivery = delivery.expect("Broken delivery");
            let body: Value =
                serde_json::from_slice(&delivery.data).unwrap_or_else(|_| json!({}));
            delivery
                .ack(BasicAckOptions::default())
                .await
                .expect("Failed to ack");
            if body["marker"] == marker.as_str() {
                return true;
            }
        }
        false
    })
    .await
    .expect("Poison message never reached the dead letter queue");

    assert!(found);
    assert_eq!(
        attempts.load(Ordering::SeqCst),
        2,
        "the handler must run once per allowed attempt and then stop"
    );

    amqp.disconnect().await.expect("Failed to disconnect");
}
