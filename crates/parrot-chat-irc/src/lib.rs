//! IRC chat client for parrot.
//!
//! Implements the `parrot-chat-protocol` capability over a plain TCP or TLS
//! connection. The [`IrcClient`] handle is cheap to clone; the socket itself
//! is owned by a spawned session task that is the sole writer on the wire.

mod client;
mod message;
mod session;

pub use client::{IrcClient, IrcConfig};
pub use message::Message;
