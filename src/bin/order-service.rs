use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use shopx::config::Config;
use shopx::orders::{OrderLine, OrderMessenger, OrderStore};
use shopx::types::{OrderInput, OrderRecord, Payment, PaymentStatus, Product};
use shopx::AmqpClient;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// Stand-in order store; the real deployment keeps orders in the order
/// service's database behind the same trait.
#[derive(Default)]
struct InMemoryOrders {
    orders: Mutex<HashMap<String, (OrderRecord, Vec<OrderLine>)>>,
}

#[async_trait]
impl OrderStore for InMemoryOrders {
    async fn create_order(&self, input: &OrderInput, products: &[Product]) -> Result<OrderRecord> {
        let mut lines = Vec::new();
        let mut total = 0.0;

        for item in &input.order_items {
            let product = products
                .iter()
                .find(|p| p.product_id == item.product_id)
                .ok_or_else(|| anyhow!("Product '{}' missing from lookup", item.product_id))?;
            total += product.product_price * f64::from(item.quantity);
            lines.push(OrderLine {
                product_id: product.product_id.clone(),
                seller_id: product.seller_id.clone(),
                quantity: item.quantity,
                product_price: product.product_price,
            });
        }

        let order = OrderRecord {
            order_id: Uuid::new_v4().to_string(),
            user_id: input.user_id.clone(),
            total_amount: total,
            created_at: Utc::now(),
            payment_status: PaymentStatus::Pending,
        };

        self.orders
            .lock()
            .await
            .insert(order.order_id.clone(), (order.clone(), lines));
        Ok(order)
    }

    async fn update_payment_status(&self, payment: &Payment) -> Result<()> {
        let mut orders = self.orders.lock().await;
        let (order, _) = orders
            .get_mut(&payment.order_id)
            .ok_or_else(|| anyhow!("Unknown order '{}'", payment.order_id))?;
        order.payment_status = payment.payment_status;
        Ok(())
    }

    async fn order_with_items(&self, order_id: &str) -> Result<(OrderRecord, Vec<OrderLine>)> {
        self.orders
            .lock()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown order '{}'", order_id))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<OrderRecord> {
        let mut orders = self.orders.lock().await;
        let (order, _) = orders
            .get_mut(order_id)
            .ok_or_else(|| anyhow!("Unknown order '{}'", order_id))?;
        order.payment_status = PaymentStatus::Refunded;
        Ok(order.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env()?;
    let amqp = Arc::new(AmqpClient::new(&config.rabbitmq_url));
    let store = Arc::new(InMemoryOrders::default());
    let messenger = Arc::new(OrderMessenger::new(amqp.clone(), store, &config));

    messenger.listen_for_payment_updates().await?;
    info!("Order service is running. Press Ctrl-C to stop.");

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    amqp.disconnect().await?;
    Ok(())
}
