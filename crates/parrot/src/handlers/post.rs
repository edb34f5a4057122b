//! Message ingress handlers.
//!
//! Accepts a message over HTTP and hands it to the bridge. Bodies are either
//! a `msg` form field or the raw request body. Success means accepted for
//! delivery, not delivered.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{info, warn};

use crate::bridge::SubmitOutcome;
use crate::server::AppState;

/// POST /post: deliver to the default channel.
pub async fn post_default(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = state.config.default_channel.clone();
    receive_message(&state, target, remote, &headers, body)
}

/// POST /post/{target}: deliver to a named channel.
pub async fn post_to_target(
    State(state): State<AppState>,
    Path(target): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = if target.trim().is_empty() {
        state.config.default_channel.clone()
    } else {
        target
    };
    receive_message(&state, target, remote, &headers, body)
}

fn receive_message(
    state: &AppState,
    target: String,
    remote: SocketAddr,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let outcome = match extract_payload(headers, body) {
        Ok(payload) => {
            let escaped = escape_newlines(&payload);
            let outcome = state.bridge.submit(&target, payload);
            match &outcome {
                SubmitOutcome::Accepted => {
                    info!(remote = %remote, channel = %target, message = %escaped, "message accepted");
                }
                SubmitOutcome::Unavailable { .. } => {
                    warn!(remote = %remote, channel = %target, message = %escaped,
                        "connection down, message refused");
                }
                SubmitOutcome::Rejected { .. } => {}
            }
            outcome
        }
        Err(reason) => SubmitOutcome::Rejected { reason },
    };

    match outcome {
        SubmitOutcome::Accepted => StatusCode::OK.into_response(),
        SubmitOutcome::Unavailable { retry_after_secs } => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
        )
            .into_response(),
        SubmitOutcome::Rejected { reason } => (StatusCode::BAD_REQUEST, reason).into_response(),
    }
}

/// The message bytes for this request: the trimmed `msg` field for form
/// submissions, the raw body otherwise.
fn extract_payload(headers: &HeaderMap, body: Bytes) -> Result<Bytes, String> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let text = std::str::from_utf8(&body)
            .map_err(|_| "form body is not valid UTF-8".to_string())?;
        let msg = url::form_urlencoded::parse(text.as_bytes())
            .find(|(key, _)| key == "msg")
            .map(|(_, value)| value.trim().to_string())
            .unwrap_or_default();
        Ok(Bytes::from(msg))
    } else {
        Ok(body)
    }
}

fn escape_newlines(payload: &Bytes) -> String {
    String::from_utf8_lossy(payload).replace('\n', "\\n")
}
