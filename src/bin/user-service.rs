use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::signal;
use tracing::info;

use shopx::config::Config;
use shopx::users::{UserDirectory, UserMessenger};
use shopx::types::{Address, UserDetails};
use shopx::AmqpClient;

/// Stand-in user directory; the real deployment reads from the user
/// service's database behind the same trait.
struct InMemoryUsers {
    users: HashMap<String, UserDetails>,
}

impl InMemoryUsers {
    fn seeded() -> Self {
        let users = vec![UserDetails {
            user_id: "u-1".to_string(),
            first_name: "Asha".to_string(),
            last_name: "Verma".to_string(),
            email: "asha@example.com".to_string(),
            phone_no: "+911234567890".to_string(),
            addresses: vec![Address {
                id: "a-1".to_string(),
                user_id: "u-1".to_string(),
                street: "12 MG Road".to_string(),
                city: "Bengaluru".to_string(),
                state: "KA".to_string(),
                country: "India".to_string(),
                postal_code: "560001".to_string(),
                is_default: true,
            }],
        }];

        InMemoryUsers {
            users: users
                .into_iter()
                .map(|user| (user.user_id.clone(), user))
                .collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUsers {
    async fn user_details(&self, user_id: &str) -> Result<UserDetails> {
        self.users
            .get(user_id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown user '{}'", user_id))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let amqp = Arc::new(AmqpClient::new(&config.rabbitmq_url));
    let directory = Arc::new(InMemoryUsers::seeded());
    let messenger = Arc::new(UserMessenger::new(amqp.clone(), directory, &config));

    messenger.serve_user_details().await?;
    info!("User service is running. Press Ctrl-C to stop.");

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    amqp.disconnect().await?;
    Ok(())
}
