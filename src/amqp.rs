//! Broker connection management.
//!
//! Every ShopX service process owns exactly one RabbitMQ connection and one
//! channel for its whole lifetime. The channel handle is cheap to clone and
//! is shared by all publishers and consumers within the process; it must
//! never be shared across processes.
//!
//! # Message Flow
//! ```plaintext
//! Publisher -> Exchange -> Queue -> Consumer
//!                    ^
//!                    |
//!              Binding (routing key)
//! ```
//!
//! Connection establishment is lazy: nothing talks to the broker until the
//! first `ensure_channel()` call, and every dependent operation calls it
//! defensively before use. There is no background reconnect; if the broker
//! is unreachable the failure is logged and propagated to the caller.

use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use anyhow::{Context, Result};

struct BrokerLink {
    connection: Connection,
    channel: Channel,
}

pub struct AmqpClient {
    uri: String,
    link: Mutex<Option<BrokerLink>>,
}

impl AmqpClient {
    pub fn new(uri: &str) -> Self {
        AmqpClient {
            uri: uri.to_string(),
            link: Mutex::new(None),
        }
    }

    /// Returns the process-wide channel, connecting first if none exists.
    /// Calling this when a channel is already open is a no-op.
    pub async fn ensure_channel(&self) -> Result<Channel> {
        let mut link = self.link.lock().await;

        if let Some(ref existing) = *link {
            return Ok(existing.channel.clone());
        }

        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .with_context(|| format!("Failed to connect to RabbitMQ at {}", self.uri))?;
        tracing::info!("Connected to RabbitMQ at {}", self.uri);

        let channel = connection
            .create_channel()
            .await
            .context("Failed to create RabbitMQ channel")?;
        tracing::info!("Channel created.");

        let handle = channel.clone();
        *link = Some(BrokerLink { connection, channel });

        Ok(handle)
    }

    /// Closes the channel, then the connection.
    pub async fn disconnect(&self) -> Result<()> {
        let mut link = self.link.lock().await;

        if let Some(open) = link.take() {
            open.channel.close(200, "Goodbye").await?;
            open.connection.close(200, "Goodbye").await?;
            tracing::info!("Disconnected from RabbitMQ.");
        }

        Ok(())
    }
}
