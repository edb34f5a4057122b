use axum::extract::State;
use axum::http::StatusCode;

use crate::bridge::ConnectionState;
use crate::server::AppState;

pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Ready means the chat connection is up; producers should not bother
/// submitting otherwise.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.bridge.state() {
        ConnectionState::Connected => (StatusCode::OK, "ok"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "chat connection down"),
    }
}
