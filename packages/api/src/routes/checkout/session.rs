use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    error::ApiError, middleware::jwt::AppUser, purchase::checkout, state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    pub price_id: String,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub checkout_url: Option<String>,
    /// Set for logged-in buyers
    pub purchase_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/checkout/session",
    tag = "checkout",
    request_body = CheckoutSessionRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutSessionResponse),
        (status = 400, description = "Missing price or redirect outside the storefront"),
        (status = 404, description = "Product is not mapped to a course"),
        (status = 502, description = "Payment provider unavailable")
    ),
    security(
        (),
        ("bearer_auth" = [])
    )
)]
#[tracing::instrument(name = "POST /checkout/session", skip(state, user, request), fields(price_id = %request.price_id))]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
    Json(request): Json<CheckoutSessionRequest>,
) -> Result<Json<CheckoutSessionResponse>, ApiError> {
    if request.price_id.trim().is_empty() {
        return Err(crate::bad_request!("Price ID is required"));
    }

    let caller = user.caller(&state).await?;
    let started = checkout::start_checkout(
        &state,
        caller.as_ref(),
        request.price_id.trim(),
        request.success_url,
        request.cancel_url,
    )
    .await?;

    Ok(Json(CheckoutSessionResponse {
        session_id: started.session_id,
        checkout_url: started.url,
        purchase_id: started.purchase.map(|purchase| purchase.id),
    }))
}
