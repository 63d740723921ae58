use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use sea_orm::{ActiveValue::Set, EntityTrait, sea_query::OnConflict};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    entity::stripe_event,
    error::ApiError,
    payment::{WebhookEvent, WebhookEventKind},
    purchase::reconcile::{self, ConfirmationStatus, ReconcileError},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/stripe", post(stripe_webhook))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// The event id was seen before and skipped
    #[serde(default)]
    pub duplicate: bool,
}

#[utoipa::path(
    post,
    path = "/webhook/stripe",
    tag = "webhook",
    request_body(content = String, description = "Raw Stripe event payload"),
    params(
        ("stripe-signature" = String, Header, description = "Stripe signature of the payload")
    ),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature"),
        (status = 500, description = "Processing failed, the provider will redeliver")
    )
)]
#[tracing::instrument(name = "POST /webhook/stripe", skip(state, headers, payload))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let provider = state.payments()?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| crate::bad_request!("Missing stripe-signature header"))?;

    let payload = std::str::from_utf8(&payload)
        .map_err(|_| crate::bad_request!("Invalid UTF-8 in payload"))?;

    let event = provider.parse_webhook(payload, signature)?;

    if is_event_processed(&state, &event.id).await? {
        tracing::info!(event_id = %event.id, "Duplicate event, skipping");
        return Ok(Json(WebhookAck {
            received: true,
            duplicate: true,
        }));
    }

    match handle_event(&state, &event).await {
        Ok(()) => {
            mark_event_processed(&state, &event).await?;
            Ok(Json(WebhookAck {
                received: true,
                duplicate: false,
            }))
        }
        Err(e) => {
            tracing::error!(event_id = %event.id, event_type = %event.event_type, "Failed to process webhook");
            Err(e)
        }
    }
}

async fn is_event_processed(state: &AppState, event_id: &str) -> Result<bool, ApiError> {
    let existing = stripe_event::Entity::find_by_id(event_id)
        .one(&state.db)
        .await?;
    Ok(existing.is_some())
}

/// Concurrent deliveries of one event may both get here; the first insert wins.
async fn mark_event_processed(state: &AppState, event: &WebhookEvent) -> Result<(), ApiError> {
    let processed = stripe_event::ActiveModel {
        id: Set(event.id.clone()),
        event_type: Set(event.event_type.clone()),
        processed_at: Set(chrono::Utc::now().naive_utc()),
    };

    stripe_event::Entity::insert(processed)
        .on_conflict(
            OnConflict::column(stripe_event::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .do_nothing()
        .exec(&state.db)
        .await?;
    Ok(())
}

/// Errors returned here make the provider redeliver. Outcomes that will not
/// change on retry are logged and acknowledged instead.
async fn handle_event(state: &AppState, event: &WebhookEvent) -> Result<(), ApiError> {
    match &event.kind {
        WebhookEventKind::CheckoutPaid { session_id } => {
            match reconcile::confirm_checkout(state, session_id, None).await {
                Ok(confirmation) => match confirmation.status {
                    ConfirmationStatus::UnmappedProduct { product_id } => {
                        tracing::warn!(session_id = %session_id, product_id = %product_id, "Paid session for unmapped product");
                    }
                    status => {
                        tracing::info!(
                            session_id = %session_id,
                            purchase_id = %confirmation.purchase.id,
                            ?status,
                            "Checkout confirmed by webhook"
                        );
                    }
                },
                Err(ReconcileError::NotPaid { .. }) => {
                    tracing::info!(session_id = %session_id, "Session not paid yet, waiting for async payment");
                }
                Err(ReconcileError::Closed {
                    purchase_id,
                    status,
                }) => {
                    tracing::warn!(session_id = %session_id, purchase_id = %purchase_id, ?status, "Ignoring payment for closed purchase");
                }
                Err(e) => return Err(e.into()),
            }
        }
        WebhookEventKind::CheckoutFailed { session_id } => {
            if let Some(transition) = reconcile::record_checkout_failure(state, session_id).await? {
                tracing::info!(
                    session_id = %session_id,
                    purchase_id = %transition.model().id,
                    status = ?transition.model().status,
                    "Recorded failed checkout"
                );
            }
        }
        WebhookEventKind::ChargeRefunded { payment_intent_id } => {
            if let Some(transition) = reconcile::record_refund(state, payment_intent_id).await? {
                tracing::info!(
                    payment_intent_id = %payment_intent_id,
                    purchase_id = %transition.model().id,
                    status = ?transition.model().status,
                    "Recorded refund"
                );
            }
        }
        WebhookEventKind::Ignored => {
            tracing::debug!(event_type = %event.event_type, "Unhandled event type");
        }
    }

    Ok(())
}
