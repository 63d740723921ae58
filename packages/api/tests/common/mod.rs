//! Shared fixtures: an in-memory SQLite state and a scripted payment provider.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use course_hub_types::async_trait;
use course_hub_api::{
    accounts,
    backend_jwt,
    config::ApiConfig,
    entity::{course, sea_orm_active_enums::CourseStatus, user},
    payment::{
        CheckoutLineItem, CheckoutSessionData, CreatedCheckoutSession, NewCheckoutSession,
        PaymentError, PaymentProvider, PaymentStatus, PriceData, WebhookEvent, WebhookEventKind,
    },
    schema,
    state::{AppState, State},
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ConnectOptions, Database};

pub const JWT_SECRET: &str = "test-secret";
pub const WEBHOOK_SIGNATURE: &str = "t=1,v1=valid";
pub const PASSWORD: &str = "correct horse battery staple";

pub fn test_config() -> ApiConfig {
    ApiConfig {
        database_url: "sqlite::memory:".to_string(),
        db_max_connections: 1,
        stripe_secret_key: None,
        stripe_webhook_secret: None,
        jwt_secret: JWT_SECRET.to_string(),
        token_ttl: Duration::from_secs(3600),
        mapping_cache_ttl: Duration::from_secs(300),
        frontend_url: "http://localhost:3000".to_string(),
        bcrypt_cost: 4,
    }
}

/// A single connection keeps every query on the same in-memory database.
pub async fn test_state(provider: Arc<FakeProvider>) -> AppState {
    let config = test_config();
    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    schema::bootstrap(&db).await.unwrap();

    Arc::new(State::from_parts(
        config,
        db,
        Some(provider as Arc<dyn PaymentProvider>),
    ))
}

#[derive(Default)]
pub struct FakeProvider {
    sessions: Mutex<HashMap<String, CheckoutSessionData>>,
    prices: Mutex<HashMap<String, PriceData>>,
    created: Mutex<Vec<NewCheckoutSession>>,
    unavailable: AtomicBool,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_session(&self, session: CheckoutSessionData) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Paid session for one unit of `product_id`, priced at 49.99 USD.
    pub fn paid_session(&self, id: &str, email: &str, product_id: &str) {
        self.add_session(CheckoutSessionData {
            id: id.to_string(),
            payment_status: PaymentStatus::Paid,
            customer_email: Some(email.to_string()),
            payment_intent_id: Some(format!("pi_{id}")),
            line_items: vec![CheckoutLineItem {
                product_id: product_id.to_string(),
                price_id: format!("price_{product_id}"),
                unit_amount: 4999,
                currency: "usd".to_string(),
            }],
        });
    }

    pub fn unpaid_session(&self, id: &str, email: &str, product_id: &str) {
        self.paid_session(id, email, product_id);
        self.set_payment_status(id, PaymentStatus::Unpaid);
    }

    pub fn set_payment_status(&self, id: &str, status: PaymentStatus) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.payment_status = status;
        }
    }

    pub fn mark_paid(&self, id: &str) {
        self.set_payment_status(id, PaymentStatus::Paid);
    }

    pub fn add_price(&self, price_id: &str, product_id: &str, unit_amount: i64) {
        self.prices.lock().unwrap().insert(
            price_id.to_string(),
            PriceData {
                price_id: price_id.to_string(),
                product_id: product_id.to_string(),
                unit_amount,
                currency: "usd".to_string(),
            },
        );
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn created_sessions(&self) -> Vec<NewCheckoutSession> {
        self.created.lock().unwrap().clone()
    }

    fn check_available(&self) -> Result<(), PaymentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PaymentError::Upstream("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSessionData, PaymentError> {
        self.check_available()?;
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| PaymentError::InvalidId(session_id.to_string()))
    }

    async fn retrieve_price(&self, price_id: &str) -> Result<PriceData, PaymentError> {
        self.check_available()?;
        self.prices
            .lock()
            .unwrap()
            .get(price_id)
            .cloned()
            .ok_or_else(|| PaymentError::InvalidId(price_id.to_string()))
    }

    async fn create_checkout_session(
        &self,
        request: NewCheckoutSession,
    ) -> Result<CreatedCheckoutSession, PaymentError> {
        self.check_available()?;
        let price = self
            .prices
            .lock()
            .unwrap()
            .get(&request.price_id)
            .cloned()
            .ok_or_else(|| PaymentError::InvalidId(request.price_id.clone()))?;

        let id = {
            let mut created = self.created.lock().unwrap();
            created.push(request.clone());
            format!("cs_test_created_{}", created.len())
        };

        self.add_session(CheckoutSessionData {
            id: id.clone(),
            payment_status: PaymentStatus::Unpaid,
            customer_email: request.customer_email.clone(),
            payment_intent_id: None,
            line_items: vec![CheckoutLineItem {
                product_id: price.product_id,
                price_id: price.price_id,
                unit_amount: price.unit_amount,
                currency: price.currency,
            }],
        });

        Ok(CreatedCheckoutSession {
            url: Some(format!("https://checkout.test/{id}")),
            id,
        })
    }

    fn parse_webhook(&self, payload: &str, signature: &str) -> Result<WebhookEvent, PaymentError> {
        if signature != WEBHOOK_SIGNATURE {
            return Err(PaymentError::InvalidSignature("signature mismatch".to_string()));
        }

        let event: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| PaymentError::Malformed(e.to_string()))?;
        let field = |pointer: &str| {
            event
                .pointer(pointer)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| PaymentError::Malformed(format!("missing {pointer}")))
        };

        let id = field("/id")?;
        let event_type = field("/type")?;
        let kind = match event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                WebhookEventKind::CheckoutPaid {
                    session_id: field("/data/object/id")?,
                }
            }
            "checkout.session.expired" | "checkout.session.async_payment_failed" => {
                WebhookEventKind::CheckoutFailed {
                    session_id: field("/data/object/id")?,
                }
            }
            "charge.refunded" => WebhookEventKind::ChargeRefunded {
                payment_intent_id: field("/data/object/payment_intent")?,
            },
            _ => WebhookEventKind::Ignored,
        };

        Ok(WebhookEvent {
            id,
            event_type,
            kind,
        })
    }
}

pub fn webhook_payload(event_id: &str, event_type: &str, object: serde_json::Value) -> String {
    serde_json::json!({
        "id": event_id,
        "type": event_type,
        "data": { "object": object }
    })
    .to_string()
}

pub async fn seed_user(state: &AppState, name: &str, email: &str) -> user::Model {
    let hashed = bcrypt::hash(PASSWORD, 4).unwrap();
    accounts::create_user(&state.db, name, email, hashed)
        .await
        .unwrap()
}

pub async fn seed_course(state: &AppState, id: &str, title: &str) -> course::Model {
    let now = chrono::Utc::now().naive_utc();
    course::ActiveModel {
        id: Set(id.to_string()),
        title: Set(title.to_string()),
        status: Set(CourseStatus::Published),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&state.db)
    .await
    .unwrap()
}

pub async fn seed_mapping(state: &AppState, product_id: &str, course_id: &str) {
    state
        .mappings
        .upsert(&state.db, product_id, course_id, true)
        .await
        .unwrap();
}

pub fn token_for(user: &user::Model) -> String {
    backend_jwt::issue_session_token(JWT_SECRET, &user.id, Duration::from_secs(3600)).unwrap()
}
