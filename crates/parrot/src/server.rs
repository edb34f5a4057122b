//! HTTP server wiring.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::bridge::Bridge;
use crate::config::Config;
use crate::handlers;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    pub config: Arc<Config>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::home))
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/post", post(handlers::post_default))
        .route("/post/{target}", post(handlers::post_to_target))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .with_state(state)
}
