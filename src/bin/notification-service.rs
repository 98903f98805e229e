use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use shopx::config::Config;
use shopx::notifications::{NotificationDispatch, NotificationMessenger};
use shopx::types::{MailOptions, SmsContext};
use shopx::AmqpClient;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// Stand-in dispatcher; the real deployment renders the template and talks
/// to the mail/SMS gateways behind the same trait.
struct LogDispatch;

#[async_trait]
impl NotificationDispatch for LogDispatch {
    async fn send_mail(&self, mail: &MailOptions) -> Result<()> {
        info!(
            "Mail to {} using template '{}': {}",
            mail.to, mail.template, mail.subject
        );
        Ok(())
    }

    async fn send_sms(&self, sms: &SmsContext) -> Result<()> {
        info!("SMS to {}", sms.phone_number);
        Ok(())
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
    let dispatch = Arc::new(LogDispatch);
    let messenger = Arc::new(NotificationMessenger::new(amqp.clone(), dispatch, &config));

    messenger.start().await?;
    info!("Notification service is running. Press Ctrl-C to stop.");

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    amqp.disconnect().await?;
    Ok(())
}
