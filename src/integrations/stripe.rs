use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::{ensure_success, form_encode};
use crate::error::Result;
use crate::models::SubscriptionStatus;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Parameters for a subscription Checkout session
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub customer_id: Option<String>,
    pub email: Option<String>,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    fn form_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("mode", "subscription".to_string()),
            ("line_items[0][price]", self.price_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("client_reference_id", self.user_id.to_string()),
            ("metadata[user_id]", self.user_id.to_string()),
            ("subscription_data[metadata][user_id]", self.user_id.to_string()),
            ("success_url", self.success_url.clone()),
            ("cancel_url", self.cancel_url.clone()),
        ];

        // Stripe rejects customer and customer_email together
        match (&self.customer_id, &self.email) {
            (Some(customer), _) => params.push(("customer", customer.clone())),
            (None, Some(email)) => params.push(("customer_email", email.clone())),
            (None, None) => {}
        }

        params
    }
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Create a Checkout session and return its hosted URL
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<String>;

    /// Create a billing portal session and return its URL
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String>;
}

pub struct StripeBilling {
    http: reqwest::Client,
    secret_key: String,
}

impl StripeBilling {
    pub fn new(secret_key: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            secret_key: secret_key.to_string(),
        }
    }

    async fn post_form(&self, path: &str, params: &[(&str, String)]) -> Result<SessionUrl> {
        let response = self
            .http
            .post(format!("{STRIPE_API_BASE}{path}"))
            .bearer_auth(&self.secret_key)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(form_encode(params))
            .send()
            .await?;

        Ok(ensure_success("Stripe", response).await?.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct SessionUrl {
    url: String,
}

#[async_trait]
impl BillingProvider for StripeBilling {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<String> {
        let session = self
            .post_form("/checkout/sessions", &request.form_params())
            .await?;
        Ok(session.url)
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String> {
        let params = [
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];
        let session = self.post_form("/billing_portal/sessions", &params).await?;
        Ok(session.url)
    }
}

// =============================================================================
// Webhook payloads
// =============================================================================

/// Webhook event envelope; `data.object` is decoded per event type
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub customer: Option<String>,
    pub client_reference_id: Option<String>,
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Copied from `subscription_data[metadata]` at checkout
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SubscriptionObject {
    pub fn period_start(&self) -> Option<DateTime<Utc>> {
        self.current_period_start
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

#[derive(Debug, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub currency: Option<String>,
    pub hosted_invoice_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkout(customer_id: Option<&str>, email: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            user_id: Uuid::nil(),
            customer_id: customer_id.map(str::to_string),
            email: email.map(str::to_string),
            price_id: "price_premium".to_string(),
            success_url: "https://app.test/ok".to_string(),
            cancel_url: "https://app.test/cancel".to_string(),
        }
    }

    fn param<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        params.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_checkout_params_prefer_existing_customer() {
        let params = checkout(Some("cus_1"), Some("a@example.com")).form_params();
        assert_eq!(param(&params, "customer"), Some("cus_1"));
        assert_eq!(param(&params, "customer_email"), None);
        assert_eq!(param(&params, "mode"), Some("subscription"));
        assert_eq!(param(&params, "line_items[0][price]"), Some("price_premium"));
        assert_eq!(
            param(&params, "client_reference_id"),
            Some("00000000-0000-0000-0000-000000000000")
        );

        let params = checkout(None, Some("a@example.com")).form_params();
        assert_eq!(param(&params, "customer"), None);
        assert_eq!(param(&params, "customer_email"), Some("a@example.com"));
    }

    #[test]
    fn test_subscription_event_decoding() {
        let json = r#"{
            "id": "evt_1",
            "type": "customer.subscription.updated",
            "data": {"object": {
                "id": "sub_1",
                "object": "subscription",
                "customer": "cus_1",
                "status": "past_due",
                "current_period_start": 1700000000,
                "current_period_end": 1702592000,
                "cancel_at_period_end": true,
                "metadata": {"user_id": "00000000-0000-0000-0000-000000000000"}
            }}
        }"#;
        let event: StripeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, "customer.subscription.updated");

        let sub: SubscriptionObject = serde_json::from_value(event.data.object).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert!(sub.cancel_at_period_end);
        assert_eq!(sub.period_start().unwrap().timestamp(), 1_700_000_000);
        assert_eq!(sub.period_end().unwrap().timestamp(), 1_702_592_000);
        assert_eq!(
            sub.metadata.get("user_id").map(String::as_str),
            Some("00000000-0000-0000-0000-000000000000")
        );
    }
}
