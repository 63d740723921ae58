use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    entity::purchase, error::ApiError, middleware::jwt::AppUser, purchase::ledger,
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PurchasesResponse {
    #[schema(value_type = Vec<Object>)]
    pub purchases: Vec<purchase::Model>,
}

#[utoipa::path(
    get,
    path = "/user/purchases",
    tag = "user",
    responses(
        (status = 200, description = "The caller's purchases, newest first", body = PurchasesResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
#[tracing::instrument(name = "GET /user/purchases", skip(state, user))]
pub async fn get_purchases(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
) -> Result<Json<PurchasesResponse>, ApiError> {
    let sub = user.sub()?;
    let purchases = ledger::list_for_user(&state.db, &sub).await?;
    Ok(Json(PurchasesResponse { purchases }))
}
