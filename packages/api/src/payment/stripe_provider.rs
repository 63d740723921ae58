use std::str::FromStr;

use course_hub_types::async_trait;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionItem, CheckoutSessionMode,
    CheckoutSessionPaymentStatus, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    EventObject, EventType, Price, PriceId, Webhook,
};

use super::{
    CheckoutLineItem, CheckoutSessionData, CreatedCheckoutSession, NewCheckoutSession,
    PaymentError, PaymentProvider, PaymentStatus, PriceData, WebhookEvent, WebhookEventKind,
};

pub struct StripeProvider {
    client: stripe::Client,
    webhook_secret: Option<String>,
}

impl StripeProvider {
    pub fn new(secret_key: impl Into<String>, webhook_secret: Option<String>) -> Self {
        Self {
            client: stripe::Client::new(secret_key.into()),
            webhook_secret,
        }
    }
}

fn upstream(err: stripe::StripeError) -> PaymentError {
    tracing::error!(error = %err, "Stripe request failed");
    PaymentError::Upstream(err.to_string())
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSessionData, PaymentError> {
        let id = CheckoutSessionId::from_str(session_id)
            .map_err(|e| PaymentError::InvalidId(format!("{session_id}: {e}")))?;

        let session = CheckoutSession::retrieve(
            &self.client,
            &id,
            &["line_items", "line_items.data.price.product"],
        )
        .await
        .map_err(upstream)?;

        Ok(session_data(session))
    }

    async fn retrieve_price(&self, price_id: &str) -> Result<PriceData, PaymentError> {
        let id = PriceId::from_str(price_id)
            .map_err(|e| PaymentError::InvalidId(format!("{price_id}: {e}")))?;

        let price = Price::retrieve(&self.client, &id, &["product"])
            .await
            .map_err(upstream)?;

        let product_id = price
            .product
            .as_ref()
            .map(|product| product.id().to_string())
            .ok_or_else(|| PaymentError::Malformed(format!("price {price_id} has no product")))?;

        Ok(PriceData {
            price_id: price.id.to_string(),
            product_id,
            unit_amount: price.unit_amount.unwrap_or_default(),
            currency: price
                .currency
                .map(|c| c.to_string().to_uppercase())
                .unwrap_or_default(),
        })
    }

    async fn create_checkout_session(
        &self,
        request: NewCheckoutSession,
    ) -> Result<CreatedCheckoutSession, PaymentError> {
        let mut params = CreateCheckoutSession::new();
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.mode = Some(CheckoutSessionMode::Payment);
        params.customer_email = request.customer_email.as_deref();
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(request.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(request.metadata.clone());

        let session = CheckoutSession::create(&self.client, params)
            .await
            .map_err(upstream)?;

        Ok(CreatedCheckoutSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    fn parse_webhook(&self, payload: &str, signature: &str) -> Result<WebhookEvent, PaymentError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or(PaymentError::NotConfigured)?;

        let event = Webhook::construct_event(payload, signature, secret)
            .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;

        let event_type = event.type_.to_string();
        let kind = match (event.type_, event.data.object) {
            (
                EventType::CheckoutSessionCompleted | EventType::CheckoutSessionAsyncPaymentSucceeded,
                EventObject::CheckoutSession(session),
            ) => WebhookEventKind::CheckoutPaid {
                session_id: session.id.to_string(),
            },
            (
                EventType::CheckoutSessionAsyncPaymentFailed | EventType::CheckoutSessionExpired,
                EventObject::CheckoutSession(session),
            ) => WebhookEventKind::CheckoutFailed {
                session_id: session.id.to_string(),
            },
            (EventType::ChargeRefunded, EventObject::Charge(charge)) => match charge.payment_intent {
                Some(intent) => WebhookEventKind::ChargeRefunded {
                    payment_intent_id: intent.id().to_string(),
                },
                None => WebhookEventKind::Ignored,
            },
            _ => WebhookEventKind::Ignored,
        };

        Ok(WebhookEvent {
            id: event.id.to_string(),
            event_type,
            kind,
        })
    }
}

fn session_data(session: CheckoutSession) -> CheckoutSessionData {
    let payment_status = match session.payment_status {
        CheckoutSessionPaymentStatus::Paid => PaymentStatus::Paid,
        CheckoutSessionPaymentStatus::Unpaid => PaymentStatus::Unpaid,
        CheckoutSessionPaymentStatus::NoPaymentRequired => PaymentStatus::NoPaymentRequired,
    };

    let customer_email = session
        .customer_details
        .as_ref()
        .and_then(|details| details.email.clone())
        .or_else(|| session.customer_email.clone());

    let line_items = session
        .line_items
        .map(|list| list.data)
        .unwrap_or_default()
        .into_iter()
        .filter_map(line_item)
        .collect();

    CheckoutSessionData {
        id: session.id.to_string(),
        payment_status,
        customer_email,
        payment_intent_id: session
            .payment_intent
            .as_ref()
            .map(|intent| intent.id().to_string()),
        line_items,
    }
}

fn line_item(item: CheckoutSessionItem) -> Option<CheckoutLineItem> {
    let price = item.price?;
    let product_id = price.product.as_ref()?.id().to_string();

    Some(CheckoutLineItem {
        product_id,
        price_id: price.id.to_string(),
        unit_amount: price.unit_amount.unwrap_or(item.amount_total),
        currency: price
            .currency
            .unwrap_or(item.currency)
            .to_string()
            .to_uppercase(),
    })
}
