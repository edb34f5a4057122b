//! Chat client capability types for parrot.
//!
//! The bridge core consumes a chat session through the [`ChatClient`] trait
//! and reacts to [`ChatEvent`]s delivered on a channel by the implementation.
//! The reference implementation is `parrot-chat-irc`; anything that can
//! deliver lines to named targets can stand in behind the same surface.

use async_trait::async_trait;
use thiserror::Error;

/// Events a chat client delivers to its consumer.
///
/// Implementations emit these on the event channel handed out at
/// construction time. Event handling must stay fast and non-blocking: the
/// client's session task is suspended while an event is being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The session is registered and ready to send.
    Connected,
    /// The session was lost. The client will not reconnect on its own.
    Disconnected { reason: String },
    /// A server or user notice, delivered for logging.
    Notice { from: String, text: String },
    /// A message addressed to a channel we are in, or directly to us.
    Message {
        /// Channel the message was sent to, or our own nick for a direct
        /// message.
        target: String,
        /// Nick of the sender.
        sender: String,
        text: String,
    },
}

/// A handle to one chat session.
///
/// Handles are cheap to clone and safe to share; all methods are
/// non-blocking apart from `connect`, which performs the dial itself.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Attempt a single connection. On success the session task runs in the
    /// background and [`ChatEvent::Connected`] follows once registration
    /// completes. On failure the client stays disconnected.
    async fn connect(&self) -> Result<(), ChatError>;

    /// Send one line to a target (channel or nick).
    async fn send(&self, target: &str, line: &str) -> Result<(), ChatError>;

    /// Request to join a channel. Membership is reflected in
    /// [`is_joined`](Self::is_joined) once the server confirms.
    async fn join(&self, target: &str) -> Result<(), ChatError>;

    /// Whether the session currently believes it has joined `target`.
    fn is_joined(&self, target: &str) -> bool;

    /// Channels the session currently believes it has joined.
    fn joined_channels(&self) -> Vec<String>;

    /// Whether the session is registered and ready to send.
    fn is_connected(&self) -> bool;

    /// The nick the session is currently known by. May differ from the
    /// configured nick after a server-side rename.
    fn current_nick(&self) -> String;
}

/// Errors surfaced by a chat client.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Establishing the connection failed.
    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),

    /// The server address could not be used as a TLS server name.
    #[error("invalid server name: {0}")]
    ServerName(String),

    /// An operation was attempted without a live session.
    #[error("not connected")]
    NotConnected,
}
