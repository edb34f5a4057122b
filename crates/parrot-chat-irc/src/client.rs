//! IRC client handle and connection establishment.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use parrot_chat_protocol::{ChatClient, ChatError, ChatEvent};

use crate::session;

/// Configuration for one IRC session.
#[derive(Debug, Clone)]
pub struct IrcConfig {
    /// Server address (`host:port`).
    pub address: String,
    /// Desired nickname. The server may assign a variant on collision.
    pub nick: String,
    /// Username (ident).
    pub username: String,
    /// Real name.
    pub realname: String,
    /// Connect with TLS.
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
}

/// Commands the handle forwards to the session task.
#[derive(Debug)]
pub(crate) enum Command {
    Join(String),
    Privmsg { target: String, text: String },
}

/// State shared between the handle and the session task.
///
/// Mutated only by the session task (plus `connect` installing the command
/// sender); the handle reads without blocking.
pub(crate) struct Shared {
    connected: AtomicBool,
    nick: RwLock<String>,
    channels: RwLock<HashSet<String>>,
    cmd_tx: RwLock<Option<mpsc::UnboundedSender<Command>>>,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl Shared {
    pub(crate) fn new(nick: String, events: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            nick: RwLock::new(nick),
            channels: RwLock::new(HashSet::new()),
            cmd_tx: RwLock::new(None),
            events,
        }
    }

    pub(crate) fn emit(&self, event: ChatEvent) {
        // The receiver outlives every session; a send can only fail during
        // process teardown.
        let _ = self.events.send(event);
    }

    pub(crate) fn set_registered(&self, nick: &str) {
        *self.nick.write().unwrap_or_else(PoisonError::into_inner) = nick.to_string();
        self.connected.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_nick(&self, nick: &str) {
        *self.nick.write().unwrap_or_else(PoisonError::into_inner) = nick.to_string();
    }

    pub(crate) fn nick(&self) -> String {
        self.nick
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn add_channel(&self, channel: &str) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.to_string());
    }

    pub(crate) fn remove_channel(&self, channel: &str) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
    }

    pub(crate) fn is_joined(&self, channel: &str) -> bool {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(channel)
    }

    pub(crate) fn joined_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        channels.sort();
        channels
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn install_session(&self, cmd_tx: mpsc::UnboundedSender<Command>) {
        *self
            .cmd_tx
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(cmd_tx);
    }

    fn has_session(&self) -> bool {
        self.cmd_tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Reset connection-scoped state after the session task ends.
    pub(crate) fn teardown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .cmd_tx
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn command(&self, cmd: Command) -> Result<(), ChatError> {
        let guard = self.cmd_tx.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(cmd).map_err(|_| ChatError::NotConnected),
            None => Err(ChatError::NotConnected),
        }
    }
}

/// A handle to an IRC session.
///
/// Created with [`IrcClient::new`], which also hands out the event receiver.
/// `connect` may be called again after a [`ChatEvent::Disconnected`]; the
/// handle stays valid across reconnects.
#[derive(Clone)]
pub struct IrcClient {
    config: Arc<IrcConfig>,
    shared: Arc<Shared>,
}

impl IrcClient {
    /// Create a client and the event stream it will deliver on.
    pub fn new(config: IrcConfig) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(config.nick.clone(), event_tx));
        (
            Self {
                config: Arc::new(config),
                shared,
            },
            event_rx,
        )
    }

    async fn connect_inner(&self) -> Result<(), ChatError> {
        if self.shared.has_session() {
            warn!("connect called with a session already running");
            return Ok(());
        }

        info!(address = %self.config.address, "connecting to IRC");
        let tcp = TcpStream::connect(&self.config.address).await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let config = self.config.as_ref().clone();
        let shared = Arc::clone(&self.shared);

        if self.config.tls {
            let tls_config = if self.config.tls_insecure {
                tls_insecure_config()
            } else {
                tls_default_config()
            };
            let connector = TlsConnector::from(Arc::new(tls_config));
            let host = self
                .config
                .address
                .split(':')
                .next()
                .unwrap_or("localhost");
            let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
                .map_err(|e| ChatError::ServerName(e.to_string()))?;
            let stream = connector.connect(server_name, tcp).await?;
            self.shared.install_session(cmd_tx);
            tokio::spawn(session::run(stream, config, shared, cmd_rx));
        } else {
            self.shared.install_session(cmd_tx);
            tokio::spawn(session::run(tcp, config, shared, cmd_rx));
        }

        Ok(())
    }
}

#[async_trait]
impl ChatClient for IrcClient {
    async fn connect(&self) -> Result<(), ChatError> {
        self.connect_inner().await
    }

    async fn send(&self, target: &str, line: &str) -> Result<(), ChatError> {
        self.shared.command(Command::Privmsg {
            target: target.to_string(),
            text: line.to_string(),
        })
    }

    async fn join(&self, target: &str) -> Result<(), ChatError> {
        self.shared.command(Command::Join(target.to_string()))
    }

    fn is_joined(&self, target: &str) -> bool {
        self.shared.is_joined(target)
    }

    fn joined_channels(&self) -> Vec<String> {
        self.shared.joined_channels()
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    fn current_nick(&self) -> String {
        self.shared.nick()
    }
}

fn tls_default_config() -> rustls::ClientConfig {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn tls_insecure_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
