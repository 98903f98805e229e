use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::info;

use shopx::config::Config;
use shopx::sellers::{SellerMessenger, SellerOrders};
use shopx::types::SellerOrderAck;
use shopx::AmqpClient;

/// Stand-in seller bookkeeping; the real deployment appends to the seller
/// service's database behind the same trait.
#[derive(Default)]
struct RecordedOrders {
    acks: Mutex<Vec<SellerOrderAck>>,
}

#[async_trait]
impl SellerOrders for RecordedOrders {
    async fn record_order(&self, ack: &SellerOrderAck) -> Result<()> {
        self.acks.lock().await.push(ack.clone());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let amqp = Arc::new(AmqpClient::new(&config.rabbitmq_url));
    let orders = Arc::new(RecordedOrders::default());
    let messenger = Arc::new(SellerMessenger::new(amqp.clone(), orders, &config));

    messenger.listen_for_order_acks().await?;
    info!("Seller service is running. Press Ctrl-C to stop.");

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    amqp.disconnect().await?;
    Ok(())
}
