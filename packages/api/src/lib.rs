use std::sync::Arc;

use axum::{
    Json, Router,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use middleware::{error_reporting::error_reporting_middleware, jwt::jwt_middleware};
use state::State;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, decompression::RequestDecompressionLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;

pub mod entity;
mod middleware;
mod routes;

pub mod accounts;
pub mod backend_jwt;
pub mod config;
pub mod error;
pub mod openapi;
pub mod payment;
pub mod purchase;
pub mod schema;
pub mod state;

pub use axum;
pub mod auth {
    use crate::middleware;
    pub use middleware::jwt::AppUser;
}

pub use sea_orm;

pub fn construct_router(state: Arc<State>) -> Router {
    let router = Router::new()
        .nest("/health", routes::health::routes())
        .nest("/auth", routes::auth::routes())
        .nest("/checkout", routes::checkout::routes())
        .nest("/user", routes::user::routes())
        .nest("/webhook", routes::webhook::routes())
        .with_state(state.clone())
        .route("/openapi.json", get(|| async { Json(openapi::ApiDoc::openapi()) }))
        .layer(from_fn(error_reporting_middleware))
        .layer(from_fn_with_state(state.clone(), jwt_middleware))
        .layer(CorsLayer::permissive())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestDecompressionLayer::new())
                .layer(CompressionLayer::new()),
        );

    Router::new().nest("/api/v1", router)
}
