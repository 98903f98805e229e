//! Product service messaging: the product detail lookup endpoint and the
//! low-stock notice to sellers.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::amqp::AmqpClient;
use crate::config::Config;
use crate::consumer::EventConsumer;
use crate::publisher::EventPublisher;
use crate::topology::{LOW_STOCK, PRODUCT_REQUEST_QUEUE};
use crate::types::{LowStockNotification, Product, ProductDetailsRequest};

/// Catalog reads, implemented outside this crate.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Returns the records for the ids that exist; unknown ids are simply
    /// absent from the result.
    async fn products_by_ids(&self, ids: &[String]) -> Result<Vec<Product>>;
}

pub struct ProductMessenger {
    publisher: EventPublisher,
    consumer: EventConsumer,
    catalog: Arc<dyn ProductCatalog>,
}

impl ProductMessenger {
    pub fn new(amqp: Arc<AmqpClient>, catalog: Arc<dyn ProductCatalog>, config: &Config) -> Self {
        ProductMessenger {
            publisher: EventPublisher::new(amqp.clone()),
            consumer: EventConsumer::new(amqp, config.max_delivery_attempts),
            catalog,
        }
    }

    /// Answers product detail lookups from the order service.
    pub async fn serve_product_requests(self: Arc<Self>) -> Result<()> {
        let messenger = Arc::clone(&self);
        self.consumer
            .serve(PRODUCT_REQUEST_QUEUE, move |request: ProductDetailsRequest| {
                let messenger = Arc::clone(&messenger);
                async move {
                    if request.product_ids.is_empty() {
                        bail!("Product ids are required");
                    }
                    messenger.catalog.products_by_ids(&request.product_ids).await
                }
            })
            .await
    }

    /// Warns the notification service that a seller is running out of
    /// stock.
    pub async fn notify_low_stock(&self, notice: &LowStockNotification) -> Result<()> {
        self.publisher.publish(&LOW_STOCK, notice).await?;
        tracing::info!("Low stock notice sent for seller {}", notice.seller_name);
        Ok(())
    }
}
