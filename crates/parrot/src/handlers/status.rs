//! The status document served on the root path.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::server::AppState;

#[derive(Serialize)]
pub struct Home {
    nick: String,
    channels: Vec<String>,
    url: String,
    http_address: String,
    irc_address: String,
}

/// GET /
pub async fn home(State(state): State<AppState>) -> Json<Home> {
    Json(Home {
        nick: state.bridge.nick(),
        channels: state.bridge.channels(),
        url: state.config.public_url(),
        http_address: state.config.http_address.clone(),
        irc_address: state.config.irc_address.clone(),
    })
}
