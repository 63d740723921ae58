use crate::state::AppState;
use axum::{Router, routing::post};

pub mod process;
pub mod session;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/process", post(process::process_checkout))
        .route("/session", post(session::create_checkout_session))
}
