use axum::{
    body::Body,
    extract::{Request, State},
    http::{Response, header::AUTHORIZATION},
    middleware::Next,
};

use crate::{
    accounts, backend_jwt,
    entity::user,
    error::ApiError,
    purchase::Caller,
    state::AppState,
};

#[derive(Debug, Clone)]
pub struct SessionUser {
    pub sub: String,
}

/// Inserted into every request. Routes decide whether a caller is required.
#[derive(Debug, Clone)]
pub enum AppUser {
    Session(SessionUser),
    Unauthorized,
}

impl AppUser {
    pub fn sub(&self) -> Result<String, ApiError> {
        match self {
            AppUser::Session(user) => Ok(user.sub.clone()),
            AppUser::Unauthorized => Err(ApiError::unauthorized("Authentication required")),
        }
    }

    pub async fn get_user(&self, state: &AppState) -> Result<user::Model, ApiError> {
        let sub = self.sub()?;
        accounts::find_user_by_id(&state.db, &sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized("User not found"))
    }

    /// The caller of a route that also serves guests.
    pub async fn caller(&self, state: &AppState) -> Result<Option<Caller>, ApiError> {
        match self {
            AppUser::Session(_) => Ok(Some(Caller::from(&self.get_user(state).await?))),
            AppUser::Unauthorized => Ok(None),
        }
    }

    pub async fn require_caller(&self, state: &AppState) -> Result<Caller, ApiError> {
        Ok(Caller::from(&self.get_user(state).await?))
    }
}

/// A missing header yields a guest; a present but invalid token is rejected.
pub async fn jwt_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response<Body>, ApiError> {
    let user = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(header) => {
            let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
            let claims = backend_jwt::verify_session_token(&state.config.jwt_secret, token)?;
            AppUser::Session(SessionUser { sub: claims.sub })
        }
        None => AppUser::Unauthorized,
    };

    request.extensions_mut().insert::<AppUser>(user);
    Ok(next.run(request).await)
}
