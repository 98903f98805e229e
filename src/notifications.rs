//! Notification service messaging.
//!
//! Consumes every notification-bearing workflow (OTP broadcast, payment
//! mail, order mail, low stock), resolves the addressee over the user
//! detail RPC where needed, and assembles the mail/SMS payloads. Actual
//! template rendering and delivery happen behind `NotificationDispatch`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use lazy_static::lazy_static;
use serde_json::json;

use crate::amqp::AmqpClient;
use crate::config::Config;
use crate::consumer::EventConsumer;
use crate::rpc::RpcClient;
use crate::topology::{LOW_STOCK, ORDER_MAIL, OTP_BROADCAST, PAYMENT_MAIL, USER_DETAILS_QUEUE};
use crate::types::{
    Address, LowStockNotification, MailOptions, OrderCancellationData, OrderConfirmationData,
    OrderRequest, OrderType, OtpRequest, PaymentMailRequest, PaymentMailType, SmsContext,
    UserDetails, UserDetailsRequest,
};

const SERVICE_NAME: &str = "ShopXIndia";
const SUPPORT_CONTACT: &str = "support@shopxindia.com";
const OTP_SUPPORT_LINK: &str = "https://shopxindia.com/support";
const OTP_VALIDITY_MINUTES: u32 = 5;

lazy_static! {
    static ref TEMPLATES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("user_otp", "userotp");
        m.insert("order_confirmation", "orderconfirmation");
        m.insert("order_cancellation", "ordercancellation");
        m.insert("payment_confirmation", "paymentconfirmation");
        m.insert("payment_cancellation", "paymentcancellation");
        m.insert("low_stock", "selleracknowledgement");
        m
    };
}

fn template(kind: &str) -> String {
    TEMPLATES.get(kind).copied().unwrap_or("generic").to_string()
}

/// Mail and SMS delivery, implemented outside this crate.
#[async_trait]
pub trait NotificationDispatch: Send + Sync {
    async fn send_mail(&self, mail: &MailOptions) -> Result<()>;
    async fn send_sms(&self, sms: &SmsContext) -> Result<()>;
}

pub struct NotificationMessenger {
    rpc: RpcClient,
    consumer: EventConsumer,
    dispatch: Arc<dyn NotificationDispatch>,
}

impl NotificationMessenger {
    pub fn new(
        amqp: Arc<AmqpClient>,
        dispatch: Arc<dyn NotificationDispatch>,
        config: &Config,
    ) -> Self {
        NotificationMessenger {
            rpc: RpcClient::new(
                amqp.clone(),
                Duration::from_secs(config.rpc_timeout_secs),
                config.rpc_pending_limit,
            ),
            consumer: EventConsumer::new(amqp, config.max_delivery_attempts),
            dispatch,
        }
    }

    /// Binds all four notification workflows.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let messenger = Arc::clone(&self);
        self.consumer
            .bind_topic(&OTP_BROADCAST, move |request: OtpRequest| {
                let messenger = Arc::clone(&messenger);
                async move { messenger.handle_otp_request(request).await }
            })
            .await?;

        let messenger = Arc::clone(&self);
        self.consumer
            .bind_topic(&PAYMENT_MAIL, move |request: PaymentMailRequest| {
                let messenger = Arc::clone(&messenger);
                async move { messenger.handle_payment_request(request).await }
            })
            .await?;

        let messenger = Arc::clone(&self);
        self.consumer
            .bind_topic(&ORDER_MAIL, move |request: OrderRequest| {
                let messenger = Arc::clone(&messenger);
                async move { messenger.handle_order_request(request).await }
            })
            .await?;

        let messenger = Arc::clone(&self);
        self.consumer
            .bind_topic(&LOW_STOCK, move |notice: LowStockNotification| {
                let messenger = Arc::clone(&messenger);
                async move { messenger.handle_low_stock(notice).await }
            })
            .await?;

        Ok(())
    }

    /// Looks the addressee up in the user service over request/reply.
    pub async fn request_user_details(&self, user_id: &str) -> Result<UserDetails> {
        let request = UserDetailsRequest {
            user_id: user_id.to_string(),
        };
        let user: UserDetails = self.rpc.request(USER_DETAILS_QUEUE, &request).await?;
        tracing::info!("Resolved user {} for notification", user.user_id);
        Ok(user)
    }

    async fn handle_otp_request(&self, request: OtpRequest) -> Result<()> {
        tracing::info!("Sending OTP notification to user {}", request.user_id);
        self.dispatch.send_mail(&otp_mail(&request)).await?;
        self.dispatch.send_sms(&otp_sms(&request)).await?;
        Ok(())
    }

    async fn handle_payment_request(&self, request: PaymentMailRequest) -> Result<()> {
        let user = self.request_user_details(&request.user_id).await?;
        let mail = match request.kind {
            PaymentMailType::Confirmation => payment_confirmation_mail(&request, &user),
            PaymentMailType::Cancellation => payment_cancellation_mail(&request, &user),
        };
        self.dispatch.send_mail(&mail).await
    }

    async fn handle_order_request(&self, request: OrderRequest) -> Result<()> {
        match request.kind {
            OrderType::Confirmation => {
                let Some(data) = request.confirmation_data else {
                    bail!("Order confirmation request without confirmation data");
                };
                let user = self.request_user_details(&data.user_id).await?;
                self.dispatch
                    .send_mail(&order_confirmation_mail(&data, &user))
                    .await
            }
            OrderType::Cancellation => {
                let Some(data) = request.cancellation_data else {
                    bail!("Order cancellation request without cancellation data");
                };
                let user = self.request_user_details(&data.user_id).await?;
                self.dispatch
                    .send_mail(&order_cancellation_mail(&data, &user))
                    .await
            }
        }
    }

    async fn handle_low_stock(&self, notice: LowStockNotification) -> Result<()> {
        tracing::info!("Sending low stock notice to seller {}", notice.seller_name);
        self.dispatch.send_mail(&low_stock_mail(&notice)).await
    }
}

fn full_name(user: &UserDetails) -> String {
    format!("{} {}", user.first_name, user.last_name)
}

fn shipping_address(addresses: &[Address]) -> String {
    addresses
        .iter()
        .find(|address| address.is_default)
        .or_else(|| addresses.first())
        .map(|address| {
            format!(
                "{}, {} {} {}",
                address.street, address.city, address.country, address.postal_code
            )
        })
        .unwrap_or_else(|| "No address on file".to_string())
}

fn otp_mail(request: &OtpRequest) -> MailOptions {
    MailOptions {
        to: request.email.clone(),
        subject: "Email Verification !".to_string(),
        template: template("user_otp"),
        context: json!({
            "userName": format!("{} {}", request.first_name, request.last_name),
            "otp": request.email_otp,
            "otpExpiry": OTP_VALIDITY_MINUTES,
            "supportLink": OTP_SUPPORT_LINK,
            "year": Utc::now().year(),
        }),
    }
}

fn otp_sms(request: &OtpRequest) -> SmsContext {
    SmsContext {
        phone_number: request.phone_no.clone(),
        otp: Some(request.sms_otp.to_string()),
        service_name: Some(SERVICE_NAME.to_string()),
        validity_period: Some(OTP_VALIDITY_MINUTES),
        message: None,
        support_contact: Some(SUPPORT_CONTACT.to_string()),
    }
}

fn order_confirmation_mail(data: &OrderConfirmationData, user: &UserDetails) -> MailOptions {
    MailOptions {
        to: user.email.clone(),
        subject: format!("Order #{} Placed Successfully !", data.order_id),
        template: template("order_confirmation"),
        context: json!({
            "userName": full_name(user),
            "orderId": data.order_id,
            "orderDate": data.order_date,
            "shippingAddress": shipping_address(&user.addresses),
            "orderItems": data.order_items,
            "totalAmount": data.total_amount,
            "orderLink": data.order_link,
            "year": Utc::now().year(),
        }),
    }
}

fn order_cancellation_mail(data: &OrderCancellationData, user: &UserDetails) -> MailOptions {
    MailOptions {
        to: user.email.clone(),
        subject: format!("Order #{} Cancelled !", data.order_id),
        template: template("order_cancellation"),
        context: json!({
            "userName": full_name(user),
            "orderId": data.order_id,
            "reason": data.reason,
            "supportLink": data.support_link,
            "year": Utc::now().year(),
        }),
    }
}

fn payment_confirmation_mail(request: &PaymentMailRequest, user: &UserDetails) -> MailOptions {
    MailOptions {
        to: user.email.clone(),
        subject: "Payment Success".to_string(),
        template: template("payment_confirmation"),
        context: json!({
            "userName": full_name(user),
            "orderId": request.order_id,
            "amount": request.amount,
            "receiptLink": request.receipt_link,
            "year": Utc::now().year(),
        }),
    }
}

fn payment_cancellation_mail(request: &PaymentMailRequest, user: &UserDetails) -> MailOptions {
    MailOptions {
        to: user.email.clone(),
        subject: "Payment Unsuccessfull".to_string(),
        template: template("payment_cancellation"),
        context: json!({
            "userName": full_name(user),
            "orderId": request.order_id,
            "amount": request.amount,
            "retryPaymentLink": request.retry_payment_link,
            "supportLink": request.support_link,
            "year": Utc::now().year(),
        }),
    }
}

fn low_stock_mail(notice: &LowStockNotification) -> MailOptions {
    MailOptions {
        to: notice.email.clone(),
        subject: "Low Product Warning !".to_string(),
        template: template("low_stock"),
        context: json!({
            "sellerName": notice.seller_name,
            "lowStockProducts": notice.low_stock_products,
            "inventoryDashboardLink": notice.inventory_dashboard_link,
            "year": Utc::now().year(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LowStockProduct;
    use chrono::Utc;

    fn user() -> UserDetails {
        UserDetails {
            user_id: "u-1".to_string(),
            first_name: "Asha".to_string(),
            last_name: "Verma".to_string(),
            email: "asha@example.com".to_string(),
            phone_no: "+911234567890".to_string(),
            addresses: vec![
                Address {
                    id: "a-1".to_string(),
                    user_id: "u-1".to_string(),
                    street: "12 MG Road".to_string(),
                    city: "Bengaluru".to_string(),
                    state: "KA".to_string(),
                    country: "India".to_string(),
                    postal_code: "560001".to_string(),
                    is_default: false,
                },
                Address {
                    id: "a-2".to_string(),
                    user_id: "u-1".to_string(),
                    street: "7 Park Street".to_string(),
                    city: "Kolkata".to_string(),
                    state: "WB".to_string(),
                    country: "India".to_string(),
                    postal_code: "700016".to_string(),
                    is_default: true,
                },
            ],
        }
    }

    #[test]
    fn otp_notifications_split_mail_and_sms_codes() {
        let request = OtpRequest {
            user_id: "u-1".to_string(),
            first_name: "Asha".to_string(),
            last_name: "Verma".to_string(),
            email: "asha@example.com".to_string(),
            phone_no: "+911234567890".to_string(),
            email_otp: 111111,
            sms_otp: 222222,
        };

        let mail = otp_mail(&request);
        assert_eq!(mail.to, "asha@example.com");
        assert_eq!(mail.template, "userotp");
        assert_eq!(mail.context["otp"], 111111);

        let sms = otp_sms(&request);
        assert_eq!(sms.phone_number, "+911234567890");
        assert_eq!(sms.otp.as_deref(), Some("222222"));
        assert_eq!(sms.service_name.as_deref(), Some("ShopXIndia"));
    }

    #[test]
    fn order_confirmation_mail_ships_to_the_default_address() {
        let data = OrderConfirmationData {
            user_id: "u-1".to_string(),
            order_id: "o-9".to_string(),
            order_date: Utc::now(),
            order_items: vec![],
            total_amount: 250.0,
            order_link: "http://shopxindia.shop/orders".to_string(),
        };

        let mail = order_confirmation_mail(&data, &user());
        assert_eq!(mail.subject, "Order #o-9 Placed Successfully !");
        assert_eq!(mail.template, "orderconfirmation");
        assert_eq!(
            mail.context["shippingAddress"],
            "7 Park Street, Kolkata India 700016"
        );
    }

    #[test]
    fn low_stock_mail_addresses_the_seller_directly() {
        let notice = LowStockNotification {
            email: "seller@example.com".to_string(),
            seller_name: "Acme Traders".to_string(),
            low_stock_products: vec![LowStockProduct {
                product_name: "Widget".to_string(),
                quantity: 2,
            }],
            inventory_dashboard_link: "http://www.shopxindia.shop/inventory".to_string(),
        };

        let mail = low_stock_mail(&notice);
        assert_eq!(mail.to, "seller@example.com");
        assert_eq!(mail.template, "selleracknowledgement");
        assert_eq!(mail.context["lowStockProducts"][0]["productName"], "Widget");
    }

    #[test]
    fn every_notification_kind_has_a_template() {
        for kind in [
            "user_otp",
            "order_confirmation",
            "order_cancellation",
            "payment_confirmation",
            "payment_cancellation",
            "low_stock",
        ] {
            assert_ne!(template(kind), "generic", "missing template for {}", kind);
        }
    }
}
