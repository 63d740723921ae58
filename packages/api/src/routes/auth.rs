use crate::{
    backend_jwt, entity::user, error::ApiError, purchase::reconcile::ClaimSummary,
    state::AppState,
};
use axum::{Router, routing::post};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod login;
pub mod register;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register::register))
        .route("/login", post(login::login))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&user::Model> for AccountInfo {
    fn from(user: &user::Model) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub user: AccountInfo,
    /// Purchases made with this email before the session existed
    pub claimed: ClaimSummary,
    /// Courses unlocked by an invite code during registration
    pub invite_course_ids: Vec<String>,
}

pub(crate) fn session_token(state: &AppState, user: &user::Model) -> Result<String, ApiError> {
    Ok(backend_jwt::issue_session_token(
        &state.config.jwt_secret,
        &user.id,
        state.config.token_ttl,
    )?)
}
