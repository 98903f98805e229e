//! User service messaging: OTP broadcast and the user detail lookup
//! endpoint.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;

use crate::amqp::AmqpClient;
use crate::config::Config;
use crate::consumer::EventConsumer;
use crate::publisher::EventPublisher;
use crate::topology::{OTP_BROADCAST, USER_DETAILS_QUEUE};
use crate::types::{OtpRequest, UserDetails, UserDetailsRequest};

/// User reads, implemented outside this crate.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_details(&self, user_id: &str) -> Result<UserDetails>;
}

pub struct UserMessenger {
    publisher: EventPublisher,
    consumer: EventConsumer,
    directory: Arc<dyn UserDirectory>,
}

impl UserMessenger {
    pub fn new(amqp: Arc<AmqpClient>, directory: Arc<dyn UserDirectory>, config: &Config) -> Self {
        UserMessenger {
            publisher: EventPublisher::new(amqp.clone()),
            consumer: EventConsumer::new(amqp, config.max_delivery_attempts),
            directory,
        }
    }

    /// Broadcasts an OTP request to every listener on the fanout exchange.
    pub async fn request_otp(&self, request: &OtpRequest) -> Result<()> {
        self.publisher.publish(&OTP_BROADCAST, request).await?;
        tracing::info!("OTP request broadcast for user {}", request.user_id);
        Ok(())
    }

    /// Answers user detail lookups from the notification service.
    pub async fn serve_user_details(self: Arc<Self>) -> Result<()> {
        let messenger = Arc::clone(&self);
        self.consumer
            .serve(USER_DETAILS_QUEUE, move |request: UserDetailsRequest| {
                let messenger = Arc::clone(&messenger);
                async move { messenger.directory.user_details(&request.user_id).await }
            })
            .await
    }
}

/// Six-digit one-time password for mail and SMS verification.
pub fn generate_otp() -> u32 {
    rand::thread_rng().gen_range(100_000..=999_999)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otps_stay_within_six_digits() {
        for _ in 0..100 {
            let otp = generate_otp();
            assert!((100_000..=999_999).contains(&otp));
        }
    }
}
