use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    entity::{course, purchase},
    error::ApiError,
    middleware::jwt::AppUser,
    purchase::reconcile::{self, ConfirmationStatus, NextStep, UserStatus},
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessCheckoutRequest {
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessCheckoutResponse {
    #[schema(value_type = Object)]
    pub purchase: purchase::Model,
    #[schema(value_type = Option<Object>)]
    pub course: Option<course::Model>,
    pub user_status: UserStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<NextStep>,
    /// Email the purchase was made with, when it differs from the caller's
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_email: Option<String>,
    /// Email to log in or register with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
}

#[utoipa::path(
    post,
    path = "/checkout/process",
    tag = "checkout",
    request_body = ProcessCheckoutRequest,
    responses(
        (status = 200, description = "Purchase reconciled", body = ProcessCheckoutResponse),
        (status = 400, description = "Missing session id or payment not completed"),
        (status = 404, description = "Product is not mapped to a course"),
        (status = 409, description = "Purchase failed or was refunded"),
        (status = 502, description = "Payment provider unavailable")
    ),
    security(
        (),
        ("bearer_auth" = [])
    )
)]
#[tracing::instrument(name = "POST /checkout/process", skip(state, user, request))]
pub async fn process_checkout(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
    Json(request): Json<ProcessCheckoutRequest>,
) -> Result<Json<ProcessCheckoutResponse>, ApiError> {
    let session_id = request
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| crate::bad_request!("Session ID is required"))?;

    let caller = user.caller(&state).await?;
    let confirmation = reconcile::confirm_checkout(&state, session_id, caller.as_ref()).await?;

    let Some((user_status, next_step)) = confirmation.status.user_status() else {
        let product_id = match &confirmation.status {
            ConfirmationStatus::UnmappedProduct { product_id } => product_id.as_str(),
            _ => confirmation.purchase.product_id.as_str(),
        };
        return Err(
            crate::not_found!("No course found for product {product_id}")
                .with_code("UNMAPPED_PRODUCT"),
        );
    };

    let purchase_email = match &confirmation.status {
        ConfirmationStatus::EmailMismatch { purchase_email } => Some(purchase_email.clone()),
        _ => None,
    };
    let customer_email = next_step.map(|_| confirmation.purchase.customer_email.clone());

    Ok(Json(ProcessCheckoutResponse {
        purchase: confirmation.purchase,
        course: confirmation.course,
        user_status,
        next_step,
        purchase_email,
        customer_email,
    }))
}
