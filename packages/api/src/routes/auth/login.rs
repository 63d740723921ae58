use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AccountInfo, SessionResponse, session_token};
use crate::{
    accounts,
    error::ApiError,
    purchase::{Caller, reconcile},
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in and pending purchases claimed", body = SessionResponse),
        (status = 401, description = "Invalid email or password")
    )
)]
#[tracing::instrument(name = "POST /auth/login", skip(state, request))]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let user = accounts::authenticate(&state.db, &request.email, &request.password).await?;

    let caller = Caller::from(&user);
    let claimed = reconcile::claim_pending_purchases(&state, &caller).await?;
    let token = session_token(&state, &user)?;

    Ok(Json(SessionResponse {
        token,
        user: AccountInfo::from(&user),
        claimed,
        invite_course_ids: Vec::new(),
    }))
}
