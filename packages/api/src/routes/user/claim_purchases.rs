use axum::{Extension, Json, extract::State};

use crate::{
    error::ApiError,
    middleware::jwt::AppUser,
    purchase::reconcile::{self, ClaimSummary, PendingClaims},
    state::AppState,
};

#[utoipa::path(
    post,
    path = "/user/claim-purchases",
    tag = "user",
    responses(
        (status = 200, description = "Pending purchases claimed", body = ClaimSummary),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
#[tracing::instrument(name = "POST /user/claim-purchases", skip(state, user))]
pub async fn claim_purchases(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
) -> Result<Json<ClaimSummary>, ApiError> {
    let caller = user.require_caller(&state).await?;
    let summary = reconcile::claim_pending_purchases(&state, &caller).await?;
    Ok(Json(summary))
}

#[utoipa::path(
    get,
    path = "/user/claim-purchases",
    tag = "user",
    responses(
        (status = 200, description = "Whether purchases are waiting to be claimed", body = PendingClaims),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
#[tracing::instrument(name = "GET /user/claim-purchases", skip(state, user))]
pub async fn get_pending_claims(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
) -> Result<Json<PendingClaims>, ApiError> {
    let caller = user.require_caller(&state).await?;
    Ok(Json(reconcile::pending_claims(&state, &caller).await?))
}
