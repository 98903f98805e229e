//! Request/reply over the broker.
//!
//! A request is published with a fresh correlation id and the name of an
//! exclusive, broker-named reply queue; the responder publishes its answer
//! to that queue carrying the same correlation id. One `RpcClient` per
//! process serves every caller: concurrent requests get independent reply
//! queues and correlation ids, so they never interfere.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::amqp::AmqpClient;

/// Replies parked on the broker are dropped after this long, so an
/// abandoned reply queue cannot accumulate messages.
const REPLY_TTL_MS: i32 = 30_000;

/// Outstanding requests, keyed by correlation id. Entries leave the map on
/// resolve, on reject, and on timeout; a correlation id is never reused
/// while its entry is alive.
#[derive(Clone)]
pub(crate) struct PendingReplies {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<Vec<u8>>>>>,
    limit: usize,
}

impl PendingReplies {
    pub(crate) fn new(limit: usize) -> Self {
        PendingReplies {
            inner: Arc::new(Mutex::new(HashMap::new())),
            limit,
        }
    }

    pub(crate) async fn register(&self, correlation_id: &str) -> Result<oneshot::Receiver<Vec<u8>>> {
        let mut pending = self.inner.lock().await;

        if pending.len() >= self.limit {
            bail!(
                "Too many outstanding requests ({}), refusing a new one",
                pending.len()
            );
        }
        if pending.contains_key(correlation_id) {
            bail!("Correlation id '{}' is already in flight", correlation_id);
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(correlation_id.to_string(), tx);
        Ok(rx)
    }

    /// Hands the reply body to the waiting caller. Returns false when no
    /// request with this correlation id is outstanding.
    pub(crate) async fn resolve(&self, correlation_id: &str, body: Vec<u8>) -> bool {
        let entry = self.inner.lock().await.remove(correlation_id);
        match entry {
            Some(tx) => tx.send(body).is_ok(),
            None => false,
        }
    }

    pub(crate) async fn forget(&self, correlation_id: &str) {
        self.inner.lock().await.remove(correlation_id);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

pub struct RpcClient {
    amqp: Arc<AmqpClient>,
    pending: PendingReplies,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(amqp: Arc<AmqpClient>, timeout: Duration, pending_limit: usize) -> Self {
        RpcClient {
            amqp,
            pending: PendingReplies::new(pending_limit),
            timeout,
        }
    }

    /// Publishes `payload` to `queue` and waits for the correlated reply.
    ///
    /// Exactly one resolve or reject per call: the reply parses and is
    /// returned, the reply fails to parse and the call errors, or the
    /// timeout fires and the call errors after the reply queue is torn
    /// down. A reply with a foreign correlation id is ignored and left for
    /// the queue TTL to clear.
    pub async fn request<Req, Resp>(&self, queue: &str, payload: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(payload)?;
        let channel = self.amqp.ensure_channel().await?;

        // Exclusive broker-named reply queue, private to this call.
        let mut queue_args = FieldTable::default();
        queue_args.insert("x-message-ttl".into(), AMQPValue::LongInt(REPLY_TTL_MS));
        let reply_queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    ..Default::default()
                },
                queue_args,
            )
            .await
            .context("Failed to declare reply queue")?;
        let reply_queue_name = reply_queue.name().as_str().to_string();

        let correlation_id = Uuid::new_v4().to_string();
        let receiver = self.pending.register(&correlation_id).await?;

        let consumer_tag = format!("rpc-{}", correlation_id);
        let consumer = match channel
            .basic_consume(
                &reply_queue_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                self.pending.forget(&correlation_id).await;
                return Err(e).with_context(|| {
                    format!("Failed to consume reply queue '{}'", reply_queue_name)
                });
            }
        };

        let pending = self.pending.clone();
        let expected = correlation_id.clone();
        tokio::spawn(async move {
            let mut consumer = consumer;
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        tracing::error!("Reply consumer failed: {}", e);
                        break;
                    }
                };

                let matches = delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|id| id.as_str() == expected)
                    .unwrap_or(false);
                if !matches {
                    // Should not happen on an exclusive queue; leave the
                    // message unacked for the TTL to clear.
                    tracing::warn!("Ignoring reply with foreign correlation id");
                    continue;
                }

                let body = delivery.data.clone();
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    tracing::error!("Failed to ack reply: {}", e);
                }
                if !pending.resolve(&expected, body).await {
                    tracing::debug!("Reply for '{}' arrived after the caller gave up", expected);
                }
                break;
            }
        });

        if let Err(e) = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_correlation_id(correlation_id.clone().into())
                    .with_reply_to(reply_queue_name.clone().into())
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await
        {
            self.pending.forget(&correlation_id).await;
            return Err(e).with_context(|| format!("Failed to publish request to '{}'", queue));
        }

        let outcome = tokio::time::timeout(self.timeout, receiver).await;

        // The reply queue is single-shot either way; tear it down rather
        // than waiting for the connection to close.
        if let Err(e) = channel
            .basic_cancel(&consumer_tag, BasicCancelOptions::default())
            .await
        {
            tracing::debug!("Failed to cancel reply consumer: {}", e);
        }
        if let Err(e) = channel
            .queue_delete(&reply_queue_name, QueueDeleteOptions::default())
            .await
        {
            tracing::debug!("Failed to delete reply queue '{}': {}", reply_queue_name, e);
        }

        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                self.pending.forget(&correlation_id).await;
                bail!("Reply channel for '{}' closed before a response arrived", queue);
            }
            Err(_) => {
                self.pending.forget(&correlation_id).await;
                bail!(
                    "No reply from '{}' within {}s",
                    queue,
                    self.timeout.as_secs()
                );
            }
        };

        serde_json::from_slice(&reply)
            .with_context(|| format!("Failed to parse reply from '{}'", queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_matching_correlation_id_resolves_the_pending_request() {
        let pending = PendingReplies::new(8);
        let rx = pending.register("corr-1").await.unwrap();

        assert!(pending.resolve("corr-1", b"[1,2]".to_vec()).await);
        assert_eq!(rx.await.unwrap(), b"[1,2]".to_vec());
        assert_eq!(pending.len().await, 0);
    }

    #[tokio::test]
    async fn a_foreign_correlation_id_resolves_nothing() {
        let pending = PendingReplies::new(8);
        let rx = pending.register("corr-1").await.unwrap();

        assert!(!pending.resolve("corr-2", b"{}".to_vec()).await);
        assert_eq!(pending.len().await, 1, "the original request stays pending");
        drop(rx);
    }

    #[tokio::test]
    async fn duplicate_correlation_ids_are_rejected_while_outstanding() {
        let pending = PendingReplies::new(8);
        let _rx = pending.register("corr-1").await.unwrap();

        assert!(pending.register("corr-1").await.is_err());
    }

    #[tokio::test]
    async fn the_pending_table_is_bounded() {
        let pending = PendingReplies::new(2);
        let _a = pending.register("a").await.unwrap();
        let _b = pending.register("b").await.unwrap();

        assert!(pending.register("c").await.is_err());

        // Timed-out requests free their slot.
        pending.forget("a").await;
        assert!(pending.register("c").await.is_ok());
    }
}
