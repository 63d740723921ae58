use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};

pub mod claim_purchases;
pub mod purchases;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/claim-purchases",
            post(claim_purchases::claim_purchases).get(claim_purchases::get_pending_claims),
        )
        .route("/purchases", get(purchases::get_purchases))
}
