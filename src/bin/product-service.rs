use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::signal;
use tracing::info;

use shopx::config::Config;
use shopx::products::{ProductCatalog, ProductMessenger};
use shopx::types::Product;
use shopx::AmqpClient;

/// Stand-in catalog; the real deployment reads from the product service's
/// database behind the same trait.
struct InMemoryCatalog {
    products: HashMap<String, Product>,
}

impl InMemoryCatalog {
    fn seeded() -> Self {
        let records = vec![
            Product {
                product_id: "p-1".to_string(),
                product_name: "Trail Running Shoes".to_string(),
                description: "Lightweight shoes with a grippy outsole.".to_string(),
                product_price: 2499.0,
                discounted_price: 1999.0,
                stock: 40,
                availability: true,
                seller_id: "s-1".to_string(),
            },
            Product {
                product_id: "p-2".to_string(),
                product_name: "Steel Water Bottle".to_string(),
                description: "1L insulated bottle.".to_string(),
                product_price: 599.0,
                discounted_price: 499.0,
                stock: 120,
                availability: true,
                seller_id: "s-2".to_string(),
            },
        ];

        InMemoryCatalog {
            products: records
                .into_iter()
                .map(|product| (product.product_id.clone(), product))
                .collect(),
        }
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn products_by_ids(&self, ids: &[String]) -> Result<Vec<Product>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.products.get(id).cloned())
            .collect())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let amqp = Arc::new(AmqpClient::new(&config.rabbitmq_url));
    let catalog = Arc::new(InMemoryCatalog::seeded());
    let messenger = Arc::new(ProductMessenger::new(amqp.clone(), catalog, &config));

    messenger.serve_product_requests().await?;
    info!("Product service is running. Press Ctrl-C to stop.");

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    amqp.disconnect().await?;
    Ok(())
}
