use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::info;

use shopx::config::Config;
use shopx::payments::{
    new_payment_id, one_time_code, PaymentMessenger, PaymentProcessor, PaymentRecord,
};
use shopx::types::PaymentInitiation;
use shopx::AmqpClient;

/// Stand-in payment store; the real deployment persists payments and parks
/// the one-time code in a cache with an expiry.
#[derive(Default)]
struct InMemoryPayments {
    payments: Mutex<HashMap<String, (PaymentRecord, String)>>,
}

#[async_trait]
impl PaymentProcessor for InMemoryPayments {
    async fn initiate(&self, request: &PaymentInitiation) -> Result<PaymentRecord> {
        let record = PaymentRecord {
            payment_id: new_payment_id(),
            order_id: request.order_id.clone(),
            user_id: request.user_id.clone(),
            amount: request.total_amount,
        };
        let code = one_time_code();
        info!(
            "Payment {} awaiting code {} for order {}",
            record.payment_id, code, record.order_id
        );

        self.payments
            .lock()
            .await
            .insert(record.order_id.clone(), (record.clone(), code));
        Ok(record)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let amqp = Arc::new(AmqpClient::new(&config.rabbitmq_url));
    let processor = Arc::new(InMemoryPayments::default());
    let messenger = Arc::new(PaymentMessenger::new(amqp.clone(), processor, &config));

    messenger.listen_for_order_requests().await?;
    info!("Payment service is running. Press Ctrl-C to stop.");

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    amqp.disconnect().await?;
    Ok(())
}
