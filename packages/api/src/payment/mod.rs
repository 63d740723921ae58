//! Payment provider seam. The orchestrator only sees the types in this module,
//! the Stripe specifics live in [`stripe_provider`].

use std::collections::HashMap;

use course_hub_types::async_trait;
use serde::{Deserialize, Serialize};

pub mod stripe_provider;

pub use stripe_provider::StripeProvider;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment provider is not configured")]
    NotConfigured,
    #[error("payment provider request failed: {0}")]
    Upstream(String),
    #[error("payment provider returned malformed data: {0}")]
    Malformed(String),
    #[error("webhook signature rejected: {0}")]
    InvalidSignature(String),
    #[error("invalid provider id: {0}")]
    InvalidId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub product_id: String,
    pub price_id: String,
    /// Minor units (cents)
    pub unit_amount: i64,
    /// Upper-case ISO code
    pub currency: String,
}

/// Authoritative view of a checkout session as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionData {
    pub id: String,
    pub payment_status: PaymentStatus,
    pub customer_email: Option<String>,
    pub payment_intent_id: Option<String>,
    pub line_items: Vec<CheckoutLineItem>,
}

impl CheckoutSessionData {
    /// A coupon that covers the full price yields `NoPaymentRequired`, which settles the session too.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.payment_status,
            PaymentStatus::Paid | PaymentStatus::NoPaymentRequired
        )
    }

    /// Every course purchase is a single line item checkout.
    pub fn primary_item(&self) -> Result<&CheckoutLineItem, PaymentError> {
        self.line_items.first().ok_or_else(|| {
            PaymentError::Malformed(format!("checkout session {} has no line items", self.id))
        })
    }

    pub fn customer_email(&self) -> Result<&str, PaymentError> {
        self.customer_email
            .as_deref()
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| {
                PaymentError::Malformed(format!(
                    "checkout session {} has no customer email",
                    self.id
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceData {
    pub price_id: String,
    pub product_id: String,
    pub unit_amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct NewCheckoutSession {
    pub price_id: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub kind: WebhookEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    /// `checkout.session.completed` and `checkout.session.async_payment_succeeded`
    CheckoutPaid { session_id: String },
    /// `checkout.session.async_payment_failed` and `checkout.session.expired`
    CheckoutFailed { session_id: String },
    ChargeRefunded { payment_intent_id: String },
    Ignored,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSessionData, PaymentError>;

    async fn retrieve_price(&self, price_id: &str) -> Result<PriceData, PaymentError>;

    async fn create_checkout_session(
        &self,
        request: NewCheckoutSession,
    ) -> Result<CreatedCheckoutSession, PaymentError>;

    /// Verifies the signature and decodes the event.
    fn parse_webhook(&self, payload: &str, signature: &str) -> Result<WebhookEvent, PaymentError>;
}

/// Provider amounts are in minor units, purchases store whole units.
pub fn to_major_units(minor: i64) -> f64 {
    minor as f64 / 100.0
}
