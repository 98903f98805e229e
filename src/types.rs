use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Wire payloads exchanged between the federated services. Field names stay
// camelCase and enum tags SCREAMING_SNAKE_CASE on the wire, matching what
// the services already speak.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Confirmation,
    Cancellation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: u32,
    pub product_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmationData {
    pub user_id: String,
    pub order_id: String,
    pub order_date: DateTime<Utc>,
    pub order_items: Vec<OrderItem>,
    pub total_amount: f64,
    pub order_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancellationData {
    pub user_id: String,
    pub order_id: String,
    pub reason: String,
    pub support_link: String,
}

/// Mail request consumed by the notification service; exactly one of the
/// data fields is present, selected by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    #[serde(rename = "type")]
    pub kind: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_data: Option<OrderConfirmationData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_data: Option<OrderCancellationData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Success,
    Failed,
    Refunded,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub payment_id: String,
    pub order_id: String,
    pub payment_status: PaymentStatus,
}

/// Status event from the payment service back to the order service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusEvent {
    #[serde(rename = "type")]
    pub kind: PaymentStatus,
    pub data: Payment,
}

/// Payment initiation request from the order service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    pub user_id: String,
    pub order_id: String,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMailType {
    Confirmation,
    Cancellation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMailRequest {
    #[serde(rename = "type")]
    pub kind: PaymentMailType,
    pub order_id: String,
    pub user_id: String,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_payment_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetailsRequest {
    pub product_ids: Vec<String>,
}

/// Catalog record as the product service replies with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: String,
    pub product_name: String,
    pub description: String,
    pub product_price: f64,
    pub discounted_price: f64,
    pub stock: u32,
    pub availability: bool,
    pub seller_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpRequest {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_no: String,
    #[serde(rename = "emailOTP")]
    pub email_otp: u32,
    #[serde(rename = "smsOTP")]
    pub sms_otp: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: String,
    pub user_id: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postal_code: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetails {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_no: String,
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetailsRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockProduct {
    pub product_name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockNotification {
    pub email: String,
    pub seller_name: String,
    pub low_stock_products: Vec<LowStockProduct>,
    pub inventory_dashboard_link: String,
}

/// Per-item acknowledgment the order service sends to sellers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerOrderAck {
    pub seller_id: String,
    pub order_id: String,
}

// Notification dispatch payloads. Template rendering and SMS delivery are
// the dispatcher's concern; the messaging core only assembles these.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailOptions {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub context: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsContext {
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity_period: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_contact: Option<String>,
}

// Order placement input and the persisted summary the workflows read back.
// The actual storage lives behind `orders::OrderStore`.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInput {
    pub user_id: String,
    pub order_items: Vec<OrderItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: String,
    pub user_id: String,
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
    pub payment_status: PaymentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_confirmation_request_matches_the_wire_shape() {
        let request = OrderRequest {
            kind: OrderType::Confirmation,
            confirmation_data: Some(OrderConfirmationData {
                user_id: "u-1".to_string(),
                order_id: "o-1".to_string(),
                order_date: "2026-01-05T10:30:00Z".parse().unwrap(),
                order_items: vec![OrderItem {
                    product_id: "p-1".to_string(),
                    quantity: 2,
                    product_price: 499.0,
                }],
                total_amount: 998.0,
                order_link: "http://shopxindia.shop/orders".to_string(),
            }),
            cancellation_data: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "CONFIRMATION");
        assert_eq!(value["confirmationData"]["orderId"], "o-1");
        assert_eq!(value["confirmationData"]["totalAmount"], 998.0);
        assert_eq!(
            value["confirmationData"]["orderItems"][0]["productId"],
            "p-1"
        );
        assert!(
            value.get("cancellationData").is_none(),
            "absent variant data must be omitted, not null"
        );
    }

    #[test]
    fn payment_status_event_parses_from_the_payment_service_shape() {
        let raw = json!({
            "type": "SUCCESS",
            "data": {
                "paymentId": "pay-7",
                "orderId": "o-7",
                "paymentStatus": "SUCCESS"
            }
        });

        let event: PaymentStatusEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.kind, PaymentStatus::Success);
        assert_eq!(event.data.payment_id, "pay-7");
        assert_eq!(event.data.payment_status, PaymentStatus::Success);
    }

    #[test]
    fn otp_request_keeps_the_upper_case_otp_fields() {
        let request = OtpRequest {
            user_id: "u-9".to_string(),
            first_name: "Asha".to_string(),
            last_name: "Verma".to_string(),
            email: "asha@example.com".to_string(),
            phone_no: "+911234567890".to_string(),
            email_otp: 123456,
            sms_otp: 654321,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["emailOTP"], 123456);
        assert_eq!(value["smsOTP"], 654321);
        assert_eq!(value["phoneNo"], "+911234567890");
    }
}
