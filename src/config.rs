use serde::Deserialize;
use anyhow::{Result, anyhow};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rabbitmq_url: String,
    pub rpc_timeout_secs: u64,
    pub rpc_pending_limit: usize,
    pub max_delivery_attempts: u32,
    pub order_link: String,
    pub support_link: String,
    pub receipt_link: String,
    pub inventory_dashboard_link: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            rabbitmq_url: std::env::var("RABBITMQ_URL")
                .unwrap_or_else(|_| "amqp://localhost".to_string()),
            rpc_timeout_secs: std::env::var("RPC_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|e| anyhow!("Invalid RPC_TIMEOUT_SECS: {}", e))?,
            rpc_pending_limit: std::env::var("RPC_PENDING_LIMIT")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .map_err(|e| anyhow!("Invalid RPC_PENDING_LIMIT: {}", e))?,
            max_delivery_attempts: std::env::var("MAX_DELIVERY_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|e| anyhow!("Invalid MAX_DELIVERY_ATTEMPTS: {}", e))?,
            order_link: std::env::var("ORDER_LINK")
                .unwrap_or_else(|_| "http://shopxindia.shop/orders".to_string()),
            support_link: std::env::var("SUPPORT_LINK")
                .unwrap_or_else(|_| "http://www.shopxindia.shop".to_string()),
            receipt_link: std::env::var("RECEIPT_LINK")
                .unwrap_or_else(|_| "http://www.shopxindia.com".to_string()),
            inventory_dashboard_link: std::env::var("INVENTORY_DASHBOARD_LINK")
                .unwrap_or_else(|_| "http://www.shopxindia.shop/inventory".to_string()),
        })
    }
}
