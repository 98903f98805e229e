use std::sync::Arc;

use anyhow::{Context, Result};
use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use serde::Serialize;

use crate::amqp::AmqpClient;
use crate::topology::{self, Topic};

/// Fire-and-forget publication of domain events. "Sent to broker" is the
/// only guarantee; nobody waits for the destination to process anything.
pub struct EventPublisher {
    amqp: Arc<AmqpClient>,
}

impl EventPublisher {
    pub fn new(amqp: Arc<AmqpClient>) -> Self {
        EventPublisher { amqp }
    }

    /// Publishes a persistent event to a workflow topic, declaring its
    /// topology first so the durable queue exists before the message does.
    pub async fn publish<P: Serialize>(&self, topic: &Topic, payload: &P) -> Result<()> {
        let channel = self.amqp.ensure_channel().await?;
        topology::declare_topic(&channel, topic).await?;

        let body = serde_json::to_vec(payload)?;
        channel
            .basic_publish(
                topic.exchange,
                topic.routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await
            .with_context(|| format!("Failed to publish to exchange '{}'", topic.exchange))?;

        tracing::info!(
            "Published event to exchange '{}' with routing key '{}'",
            topic.exchange,
            topic.routing_key
        );
        Ok(())
    }

    /// Publishes a persistent message straight to a durable queue through
    /// the default exchange.
    pub async fn send_to_queue<P: Serialize>(&self, queue: &str, payload: &P) -> Result<()> {
        let channel = self.amqp.ensure_channel().await?;
        topology::declare_work_queue(&channel, queue).await?;

        let body = serde_json::to_vec(payload)?;
        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await
            .with_context(|| format!("Failed to publish to queue '{}'", queue))?;

        tracing::info!("Published message to queue '{}'", queue);
        Ok(())
    }
}
