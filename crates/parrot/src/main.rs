use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parrot::bridge::{AddressMatcher, Bridge};
use parrot::config::Config;
use parrot::server::{AppState, build_app};
use parrot_chat_irc::{IrcClient, IrcConfig};
use parrot_chat_protocol::ChatClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::parse());

    let (client, events) = IrcClient::new(IrcConfig {
        address: config.irc_address.clone(),
        nick: config.nick.clone(),
        username: config.nick.clone(),
        realname: config.nick.clone(),
        tls: config.ssl,
        tls_insecure: config.ssl,
    });
    let client: Arc<dyn ChatClient> = Arc::new(client);

    let matcher = AddressMatcher::new(&config.nick).context("invalid nickname pattern")?;
    let (bridge, consumer) = Bridge::new(client, Arc::clone(&config));

    tokio::spawn(bridge.clone().run_delivery(consumer));
    tokio::spawn(bridge.clone().run_events(events, matcher));

    bridge
        .connect()
        .await
        .context("initial IRC connection failed")?;

    let state = AppState {
        bridge,
        config: Arc::clone(&config),
    };
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&config.http_address)
        .await
        .with_context(|| format!("failed to bind {}", config.http_address))?;
    info!(address = %config.http_address, "HTTP server running");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("HTTP server failed")?;
    Ok(())
}
