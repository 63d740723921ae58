use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AccountInfo, SessionResponse, session_token};
use crate::{
    accounts::{self, NewAccount},
    error::ApiError,
    purchase::{Caller, reconcile},
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub invite_code: Option<String>,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created and earlier purchases claimed", body = SessionResponse),
        (status = 400, description = "Missing fields, email taken or invite code unusable")
    )
)]
#[tracing::instrument(name = "POST /auth/register", skip(state, request))]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let registered = accounts::register(
        &state.db,
        NewAccount {
            name: request.name,
            email: request.email,
            password: request.password,
            invite_code: request.invite_code,
        },
        state.config.bcrypt_cost,
    )
    .await?;

    let caller = Caller::from(&registered.user);
    let claimed = reconcile::claim_pending_purchases(&state, &caller).await?;
    let token = session_token(&state, &registered.user)?;

    Ok(Json(SessionResponse {
        token,
        user: AccountInfo::from(&registered.user),
        claimed,
        invite_course_ids: registered
            .invite_grants
            .into_iter()
            .map(|grant| grant.course_id)
            .collect(),
    }))
}
