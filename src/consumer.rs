//! Per-queue consumer loops.
//!
//! Each bound queue gets its own dispatch task on the shared channel: parse
//! the JSON body, hand it to the domain handler, ack on success. A failed
//! handler does not lose the message and does not loop it forever either:
//! the attempt count travels in a header, the message is republished until
//! the limit is reached, then routed to the dead letter queue. Delivery is
//! at-least-once throughout; handlers must tolerate redelivery.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::amqp::AmqpClient;
use crate::topology::{self, Topic, DEAD_LETTER_EXCHANGE};

const ATTEMPTS_HEADER: &str = "x-delivery-attempts";

/// What to do with a delivery whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Republish with the incremented attempt count.
    Retry(u32),
    /// Attempts exhausted; hand over to the dead letter exchange.
    DeadLetter,
}

pub(crate) fn retry_disposition(prior_attempts: u32, max_attempts: u32) -> Disposition {
    let attempts = prior_attempts.saturating_add(1);
    if attempts >= max_attempts {
        Disposition::DeadLetter
    } else {
        Disposition::Retry(attempts)
    }
}

pub(crate) fn delivery_attempts(properties: &BasicProperties) -> u32 {
    properties
        .headers()
        .as_ref()
        .and_then(|headers| {
            headers
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == ATTEMPTS_HEADER)
                .map(|(_, value)| value)
        })
        .and_then(|value| match value {
            AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongUInt(n) => Some(*n),
            AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::ShortInt(n) => u32::try_from(*n).ok(),
            AMQPValue::ShortUInt(n) => Some(u32::from(*n)),
            _ => None,
        })
        .unwrap_or(0)
}

async fn dead_letter(channel: &Channel, origin_queue: &str, body: &[u8]) -> Result<()> {
    channel
        .basic_publish(
            DEAD_LETTER_EXCHANGE,
            origin_queue,
            BasicPublishOptions::default(),
            body,
            BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(2),
        )
        .await
        .with_context(|| format!("Failed to dead-letter message from '{}'", origin_queue))?;
    Ok(())
}

async fn requeue(channel: &Channel, queue: &str, body: &[u8], attempts: u32) -> Result<()> {
    let mut headers = FieldTable::default();
    headers.insert(ATTEMPTS_HEADER.into(), AMQPValue::LongInt(attempts as i32));

    channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            body,
            BasicProperties::default()
                .with_headers(headers)
                .with_content_type("application/json".into())
                .with_delivery_mode(2),
        )
        .await
        .with_context(|| format!("Failed to requeue message on '{}'", queue))?;
    Ok(())
}

/// Runs the failure path for a delivery: requeue below the attempt limit,
/// dead-letter at it, ack the original either way.
async fn recover(
    channel: &Channel,
    queue: &str,
    delivery: &Delivery,
    max_attempts: u32,
) -> Result<()> {
    match retry_disposition(delivery_attempts(&delivery.properties), max_attempts) {
        Disposition::Retry(attempts) => {
            tracing::warn!(
                "Handler failed on '{}', requeueing (attempt {} of {})",
                queue,
                attempts,
                max_attempts
            );
            requeue(channel, queue, &delivery.data, attempts).await?;
        }
        Disposition::DeadLetter => {
            tracing::error!(
                "Message on '{}' exhausted {} delivery attempts, dead-lettering",
                queue,
                max_attempts
            );
            dead_letter(channel, queue, &delivery.data).await?;
        }
    }
    delivery.ack(BasicAckOptions::default()).await?;
    Ok(())
}

pub struct EventConsumer {
    amqp: Arc<AmqpClient>,
    max_attempts: u32,
}

impl EventConsumer {
    pub fn new(amqp: Arc<AmqpClient>, max_attempts: u32) -> Self {
        EventConsumer { amqp, max_attempts }
    }

    /// Binds a workflow topic and dispatches its deliveries to `handler`.
    pub async fn bind_topic<P, H, Fut>(&self, topic: &Topic, handler: H) -> Result<()>
    where
        P: DeserializeOwned + Send + 'static,
        H: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let channel = self.amqp.ensure_channel().await?;
        topology::declare_topic(&channel, topic).await?;
        topology::declare_dead_letter(&channel).await?;

        self.spawn_event_loop(channel, topic.queue, handler).await?;
        tracing::info!(
            "Consumer set up for exchange '{}', queue '{}', routing key '{}'",
            topic.exchange,
            topic.queue,
            topic.routing_key
        );
        Ok(())
    }

    /// Consumes a plain work queue (default-exchange workflows).
    pub async fn bind_queue<P, H, Fut>(&self, queue: &'static str, handler: H) -> Result<()>
    where
        P: DeserializeOwned + Send + 'static,
        H: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let channel = self.amqp.ensure_channel().await?;
        topology::declare_work_queue(&channel, queue).await?;
        topology::declare_dead_letter(&channel).await?;

        self.spawn_event_loop(channel, queue, handler).await?;
        tracing::info!("Listening for messages on queue '{}'", queue);
        Ok(())
    }

    async fn spawn_event_loop<P, H, Fut>(
        &self,
        channel: Channel,
        queue: &'static str,
        handler: H,
    ) -> Result<()>
    where
        P: DeserializeOwned + Send + 'static,
        H: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to consume queue '{}'", queue))?;

        let max_attempts = self.max_attempts;
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        tracing::error!("Consumer on '{}' failed: {}", queue, e);
                        break;
                    }
                };

                let outcome = match serde_json::from_slice::<P>(&delivery.data) {
                    Ok(payload) => match handler(payload).await {
                        Ok(()) => delivery
                            .ack(BasicAckOptions::default())
                            .await
                            .map_err(anyhow::Error::from),
                        Err(e) => {
                            tracing::error!("Error processing message on '{}': {}", queue, e);
                            recover(&channel, queue, &delivery, max_attempts).await
                        }
                    },
                    Err(e) => {
                        // A reparse cannot succeed; skip the retry loop.
                        tracing::warn!("Unparseable message on '{}': {}", queue, e);
                        match dead_letter(&channel, queue, &delivery.data).await {
                            Ok(()) => delivery
                                .ack(BasicAckOptions::default())
                                .await
                                .map_err(anyhow::Error::from),
                            Err(e) => Err(e),
                        }
                    }
                };

                if let Err(e) = outcome {
                    tracing::error!("Failed to settle delivery on '{}': {}", queue, e);
                }
            }
        });

        Ok(())
    }

    /// Serves request/reply lookups on a queue: the handler's result is
    /// published to the request's `replyTo` queue with its correlation id.
    pub async fn serve<Req, Resp, H, Fut>(&self, queue: &'static str, handler: H) -> Result<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        H: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let channel = self.amqp.ensure_channel().await?;
        topology::declare_work_queue(&channel, queue).await?;
        topology::declare_dead_letter(&channel).await?;

        let mut consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to consume queue '{}'", queue))?;

        let max_attempts = self.max_attempts;
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        tracing::error!("Consumer on '{}' failed: {}", queue, e);
                        break;
                    }
                };

                if let Err(e) =
                    serve_one(&channel, queue, &delivery, &handler, max_attempts).await
                {
                    tracing::error!("Failed to settle request on '{}': {}", queue, e);
                }
            }
        });

        tracing::info!("Serving lookups on queue '{}'", queue);
        Ok(())
    }
}

async fn serve_one<Req, Resp, H, Fut>(
    channel: &Channel,
    queue: &str,
    delivery: &Delivery,
    handler: &H,
    max_attempts: u32,
) -> Result<()>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    H: Fn(Req) -> Fut,
    Fut: Future<Output = Result<Resp>>,
{
    let request = match serde_json::from_slice::<Req>(&delivery.data) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Unparseable request on '{}': {}", queue, e);
            dead_letter(channel, queue, &delivery.data).await?;
            delivery.ack(BasicAckOptions::default()).await?;
            return Ok(());
        }
    };

    let reply_to = match delivery.properties.reply_to() {
        Some(reply_to) => reply_to.as_str().to_string(),
        None => {
            tracing::warn!("Request on '{}' has no replyTo queue, dropping it", queue);
            delivery.ack(BasicAckOptions::default()).await?;
            return Ok(());
        }
    };

    match handler(request).await {
        Ok(response) => {
            let body = serde_json::to_vec(&response)?;
            let mut properties = BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(2);
            if let Some(correlation_id) = delivery.properties.correlation_id() {
                properties = properties.with_correlation_id(correlation_id.clone());
            }

            channel
                .basic_publish(
                    "",
                    &reply_to,
                    BasicPublishOptions::default(),
                    &body,
                    properties,
                )
                .await
                .with_context(|| format!("Failed to reply to '{}'", reply_to))?;
            delivery.ack(BasicAckOptions::default()).await?;
            tracing::info!("Replied to request from '{}' on '{}'", queue, reply_to);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Error serving request on '{}': {}", queue, e);
            recover(channel, queue, delivery, max_attempts).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_failure_is_retried() {
        assert_eq!(retry_disposition(0, 5), Disposition::Retry(1));
        assert_eq!(retry_disposition(3, 5), Disposition::Retry(4));
    }

    #[test]
    fn an_exhausted_message_is_dead_lettered() {
        assert_eq!(retry_disposition(4, 5), Disposition::DeadLetter);
        assert_eq!(retry_disposition(9, 5), Disposition::DeadLetter);
    }

    #[test]
    fn a_single_attempt_limit_never_retries() {
        assert_eq!(retry_disposition(0, 1), Disposition::DeadLetter);
    }

    #[test]
    fn attempts_are_read_back_from_the_header() {
        let mut headers = FieldTable::default();
        headers.insert(ATTEMPTS_HEADER.into(), AMQPValue::LongInt(3));
        let properties = BasicProperties::default().with_headers(headers);

        assert_eq!(delivery_attempts(&properties), 3);
    }

    #[test]
    fn missing_or_malformed_headers_count_as_zero_attempts() {
        assert_eq!(delivery_attempts(&BasicProperties::default()), 0);

        let mut headers = FieldTable::default();
        headers.insert(
            ATTEMPTS_HEADER.into(),
            AMQPValue::LongString("three".into()),
        );
        let properties = BasicProperties::default().with_headers(headers);
        assert_eq!(delivery_attempts(&properties), 0);
    }
}
