//! The bridge core.
//!
//! Owns the hand-off from any number of HTTP producers into one serialized
//! outbound stream on the chat connection, the connection lifecycle
//! (connect, detect loss, fixed-interval retry, rejoin), and the inbound
//! reply decision.
//!
//! ```text
//!  HTTP handlers ──submit()──▶ MessageQueue ──▶ delivery task ──▶ ChatClient
//!                                                                    │
//!  retry task ◀──spawn── event task ◀──────────── ChatEvent channel ─┘
//! ```

mod addressing;
mod queue;

pub use addressing::AddressMatcher;
pub use queue::{MessageConsumer, MessageQueue, OutboundMessage};

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use parrot_chat_protocol::{ChatClient, ChatError, ChatEvent};

use crate::config::Config;

// ============================================================================
// Public types
// ============================================================================

/// Where the chat connection currently stands. Written only by the
/// lifecycle handling; everything else reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The ingress decision for one submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted for delivery. Asynchronous: the message may still be
    /// dropped if the connection fails before it drains.
    Accepted,
    /// The connection is down; nothing was enqueued. Producers should back
    /// off for at least the given number of seconds.
    Unavailable { retry_after_secs: u64 },
    /// The payload could not be used at all.
    Rejected { reason: String },
}

// ============================================================================
// Bridge
// ============================================================================

/// Handle to the bridge. Cheap to clone; all clones share the queue, the
/// connection state, and the chat client.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Inner {
    client: Arc<dyn ChatClient>,
    config: Arc<Config>,
    queue: MessageQueue,
    state: watch::Sender<ConnectionState>,
}

impl Bridge {
    /// Create the bridge and the consumer end of its queue. The caller
    /// spawns [`run_delivery`](Self::run_delivery) with the consumer and
    /// [`run_events`](Self::run_events) with the client's event stream.
    pub fn new(client: Arc<dyn ChatClient>, config: Arc<Config>) -> (Bridge, MessageConsumer) {
        let (queue, consumer) = MessageQueue::channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let bridge = Bridge {
            inner: Arc::new(Inner {
                client,
                config,
                queue,
                state,
            }),
        };
        (bridge, consumer)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
    }

    /// The nick the chat session currently answers to.
    pub fn nick(&self) -> String {
        self.inner.client.current_nick()
    }

    /// Channels the chat session is currently in.
    pub fn channels(&self) -> Vec<String> {
        self.inner.client.joined_channels()
    }

    // ------------------------------------------------------------------
    // Ingress
    // ------------------------------------------------------------------

    /// Accept or refuse one message for delivery. Never blocks: this is a
    /// state check and an unbounded enqueue.
    pub fn submit(&self, target: &str, payload: Bytes) -> SubmitOutcome {
        if payload.iter().all(u8::is_ascii_whitespace) {
            // Nothing to say; accepted silently, nothing enqueued.
            return SubmitOutcome::Accepted;
        }
        if self.state() != ConnectionState::Connected {
            return SubmitOutcome::Unavailable {
                retry_after_secs: self.inner.config.retry_after_secs(),
            };
        }
        self.inner.queue.enqueue(OutboundMessage {
            target: target.to_string(),
            payload,
        });
        SubmitOutcome::Accepted
    }

    // ------------------------------------------------------------------
    // Outbound delivery
    // ------------------------------------------------------------------

    /// Drain the queue for the life of the process. This task is the only
    /// caller of the client's send and join operations for queued traffic,
    /// so outbound frames from concurrent producers never interleave.
    pub async fn run_delivery(self, mut consumer: MessageConsumer) {
        while let Some(msg) = consumer.dequeue().await {
            self.deliver(msg).await;
        }
        debug!("all queue producers dropped, delivery task exiting");
    }

    async fn deliver(&self, msg: OutboundMessage) {
        let channel = format!("#{}", msg.target);
        for line in msg.payload.split(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(line);
            self.emit(&channel, &line).await;
        }
    }

    /// Send one line, joining the channel first if we are not in it.
    /// Failures are logged and the line dropped; delivery is at-most-once.
    async fn emit(&self, channel: &str, line: &str) {
        let client = &self.inner.client;
        if !client.is_joined(channel) {
            info!(%channel, "joining");
            if let Err(e) = client.join(channel).await {
                warn!(error = %e, %channel, "join failed");
            }
        }
        if let Err(e) = client.send(channel, line).await {
            warn!(error = %e, %channel, "send failed, line dropped");
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// A single connection attempt.
    pub async fn connect(&self) -> Result<(), ChatError> {
        self.set_state(ConnectionState::Connecting);
        match self.inner.client.connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Retry [`connect`](Self::connect) at a fixed interval until it
    /// succeeds. No backoff, no attempt cap; chat networks flap and the
    /// bridge heals itself whenever they come back.
    pub async fn connect_with_retry(&self) {
        while let Err(e) = self.connect().await {
            warn!(error = %e, "connection failed, retrying");
            tokio::time::sleep(self.inner.config.retry_delay()).await;
        }
    }

    /// React to client events for the life of the process. Handlers stay
    /// fast: reconnect work is spawned off so this loop never stalls the
    /// client's event delivery.
    pub async fn run_events(
        self,
        mut events: mpsc::UnboundedReceiver<ChatEvent>,
        mut matcher: AddressMatcher,
    ) {
        while let Some(event) = events.recv().await {
            self.handle_event(event, &mut matcher).await;
        }
        debug!("event channel closed, event task exiting");
    }

    async fn handle_event(&self, event: ChatEvent, matcher: &mut AddressMatcher) {
        match event {
            ChatEvent::Connected => {
                self.set_state(ConnectionState::Connected);
                info!("connected");
                let channel = self.inner.config.default_channel_name();
                if let Err(e) = self.inner.client.join(&channel).await {
                    warn!(error = %e, %channel, "default channel join failed");
                }
                if let Some(ref password) = self.inner.config.nick_password {
                    let identify = format!("IDENTIFY {password}");
                    if let Err(e) = self.inner.client.send("NickServ", &identify).await {
                        warn!(error = %e, "NickServ identify failed");
                    }
                }
            }
            ChatEvent::Disconnected { reason } => {
                self.set_state(ConnectionState::Disconnected);
                warn!(%reason, "disconnected, retrying to connect");
                // Pre-emptive default-channel rejoin, issued before any
                // reconnect attempt; a no-op against a dead session.
                let channel = self.inner.config.default_channel_name();
                if let Err(e) = self.inner.client.join(&channel).await {
                    debug!(error = %e, %channel, "pre-reconnect join failed");
                }
                let bridge = self.clone();
                tokio::spawn(async move { bridge.connect_with_retry().await });
            }
            ChatEvent::Notice { from, text } => {
                info!(%from, %text, "notice");
            }
            ChatEvent::Message {
                target,
                sender,
                text,
            } => {
                self.handle_chat_message(matcher, target, sender, text)
                    .await;
            }
        }
    }

    /// Reply with the canned disclaimer when a channel message addresses
    /// us, or on any direct message. Stateless per line.
    async fn handle_chat_message(
        &self,
        matcher: &mut AddressMatcher,
        target: String,
        sender: String,
        text: String,
    ) {
        let nick = self.inner.client.current_nick();
        matcher.refresh(&nick);

        let reply_target = if target == nick {
            Some(sender.clone())
        } else if matcher.matches(&text) {
            Some(target.clone())
        } else {
            None
        };
        let Some(reply_target) = reply_target else {
            return;
        };

        info!(%sender, %target, %text, "addressed by message");
        let reply = format!("I'm not very smart, see {}", self.inner.config.public_url());
        if let Err(e) = self.inner.client.send(&reply_target, &reply).await {
            warn!(error = %e, target = %reply_target, "reply failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    use crate::testing::{Call, MockChatClient};

    fn test_config(args: &[&str]) -> Arc<Config> {
        use clap::Parser;
        let mut full = vec!["parrot"];
        full.extend_from_slice(args);
        Arc::new(Config::parse_from(full))
    }

    fn bridge_with(
        mock: &Arc<MockChatClient>,
        config: Arc<Config>,
    ) -> (Bridge, MessageConsumer) {
        let client: Arc<dyn ChatClient> = mock.clone();
        Bridge::new(client, config)
    }

    async fn assert_queue_empty(consumer: &mut MessageConsumer) {
        assert!(
            timeout(Duration::from_millis(20), consumer.dequeue())
                .await
                .is_err(),
            "queue should be empty"
        );
    }

    #[tokio::test]
    async fn payload_lines_become_ordered_sends() {
        let mock = Arc::new(MockChatClient::new("parrot").joined(&["#news"]));
        let (bridge, mut consumer) = bridge_with(&mock, test_config(&[]));
        bridge.set_state(ConnectionState::Connected);

        assert_eq!(
            bridge.submit("news", Bytes::from_static(b"line1\nline2")),
            SubmitOutcome::Accepted
        );
        let msg = consumer.dequeue().await.unwrap();
        bridge.deliver(msg).await;

        // Already a member: exactly two sends, in order, no join.
        assert_eq!(
            mock.calls(),
            vec![
                Call::Send {
                    target: "#news".to_string(),
                    line: "line1".to_string(),
                },
                Call::Send {
                    target: "#news".to_string(),
                    line: "line2".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn join_issued_before_first_send_only() {
        let mock = Arc::new(MockChatClient::new("parrot"));
        let (bridge, mut consumer) = bridge_with(&mock, test_config(&[]));
        bridge.set_state(ConnectionState::Connected);

        bridge.submit("news", Bytes::from_static(b"one"));
        bridge.submit("news", Bytes::from_static(b"two"));
        let first = consumer.dequeue().await.unwrap();
        let second = consumer.dequeue().await.unwrap();
        bridge.deliver(first).await;
        bridge.deliver(second).await;

        assert_eq!(
            mock.calls(),
            vec![
                Call::Join("#news".to_string()),
                Call::Send {
                    target: "#news".to_string(),
                    line: "one".to_string(),
                },
                // Membership is tracked now, no redundant join.
                Call::Send {
                    target: "#news".to_string(),
                    line: "two".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn submit_while_disconnected_enqueues_nothing() {
        let mock = Arc::new(MockChatClient::new("parrot"));
        let (bridge, mut consumer) = bridge_with(&mock, test_config(&[]));

        let outcome = bridge.submit("news", Bytes::from_static(b"hello"));
        match outcome {
            SubmitOutcome::Unavailable { retry_after_secs } => {
                assert!(retry_after_secs > 0);
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
        assert_queue_empty(&mut consumer).await;

        // Connecting is not connected either.
        bridge.set_state(ConnectionState::Connecting);
        assert!(matches!(
            bridge.submit("news", Bytes::from_static(b"hello")),
            SubmitOutcome::Unavailable { .. }
        ));
        assert_queue_empty(&mut consumer).await;
    }

    #[tokio::test]
    async fn whitespace_only_payload_is_a_silent_no_op() {
        let mock = Arc::new(MockChatClient::new("parrot"));
        let (bridge, mut consumer) = bridge_with(&mock, test_config(&[]));
        bridge.set_state(ConnectionState::Connected);

        assert_eq!(
            bridge.submit("news", Bytes::from_static(b"  \n\t ")),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            bridge.submit("news", Bytes::new()),
            SubmitOutcome::Accepted
        );
        assert_queue_empty(&mut consumer).await;
    }

    #[tokio::test]
    async fn identical_submits_are_not_deduplicated() {
        let mock = Arc::new(MockChatClient::new("parrot").joined(&["#news"]));
        let (bridge, mut consumer) = bridge_with(&mock, test_config(&[]));
        bridge.set_state(ConnectionState::Connected);

        bridge.submit("news", Bytes::from_static(b"ping"));
        bridge.submit("news", Bytes::from_static(b"ping"));
        for _ in 0..2 {
            let msg = consumer.dequeue().await.unwrap();
            bridge.deliver(msg).await;
        }
        assert_eq!(mock.sends().len(), 2);
    }

    #[tokio::test]
    async fn send_failure_drops_line_and_continues() {
        let mock = Arc::new(MockChatClient::new("parrot").joined(&["#news"]));
        mock.fail_sends(true);
        let (bridge, mut consumer) = bridge_with(&mock, test_config(&[]));
        bridge.set_state(ConnectionState::Connected);

        bridge.submit("news", Bytes::from_static(b"a\nb"));
        let msg = consumer.dequeue().await.unwrap();
        bridge.deliver(msg).await;
        // Both lines were attempted despite the first failing.
        assert_eq!(mock.sends().len(), 2);

        mock.fail_sends(false);
        bridge.submit("news", Bytes::from_static(b"c"));
        let msg = consumer.dequeue().await.unwrap();
        bridge.deliver(msg).await;
        assert_eq!(mock.sends().len(), 3);
    }

    #[tokio::test]
    async fn connected_event_joins_default_channel_and_identifies() {
        let mock = Arc::new(MockChatClient::new("parrot"));
        let config = test_config(&["--nick-password", "hunter2"]);
        let (bridge, _consumer) = bridge_with(&mock, config);
        let mut matcher = AddressMatcher::new("parrot").unwrap();

        bridge
            .handle_event(ChatEvent::Connected, &mut matcher)
            .await;

        assert_eq!(bridge.state(), ConnectionState::Connected);
        assert_eq!(
            mock.calls(),
            vec![
                Call::Join("#parrot".to_string()),
                Call::Send {
                    target: "NickServ".to_string(),
                    line: "IDENTIFY hunter2".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn reconnect_joins_default_channel_exactly_once_per_connect() {
        // N failed attempts, then success; the connected event must produce
        // exactly one default-channel join regardless of N.
        for failures in [0usize, 1, 4] {
            let mock = Arc::new(MockChatClient::new("parrot"));
            mock.fail_next_connects(failures);
            let config = test_config(&["--retry-interval", "0"]);
            let (bridge, _consumer) = bridge_with(&mock, config);
            let mut matcher = AddressMatcher::new("parrot").unwrap();

            bridge
                .handle_event(
                    ChatEvent::Disconnected {
                        reason: "test".to_string(),
                    },
                    &mut matcher,
                )
                .await;

            // The spawned retry task runs until the mock accepts.
            timeout(Duration::from_secs(2), async {
                while mock.connect_count() < failures + 1 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("retry task never succeeded");
            assert_eq!(mock.connect_count(), failures + 1);

            bridge
                .handle_event(ChatEvent::Connected, &mut matcher)
                .await;
            assert_eq!(bridge.state(), ConnectionState::Connected);

            // One pre-emptive join from the disconnect handler, one
            // connected-triggered join after the successful attempt.
            let calls = mock.calls();
            let last_connect = calls
                .iter()
                .rposition(|c| *c == Call::Connect)
                .expect("no connect recorded");
            let joins_after_connect = calls[last_connect..]
                .iter()
                .filter(|c| **c == Call::Join("#parrot".to_string()))
                .count();
            assert_eq!(joins_after_connect, 1, "failures={failures}");
        }
    }

    #[tokio::test]
    async fn addressed_channel_message_triggers_reply_to_channel() {
        let mock = Arc::new(MockChatClient::new("parrot"));
        let (bridge, _consumer) = bridge_with(&mock, test_config(&[]));
        let mut matcher = AddressMatcher::new("parrot").unwrap();

        for text in ["parrot: hello", "PARROT, hi"] {
            bridge
                .handle_event(
                    ChatEvent::Message {
                        target: "#news".to_string(),
                        sender: "alice".to_string(),
                        text: text.to_string(),
                    },
                    &mut matcher,
                )
                .await;
        }

        let sends = mock.sends();
        assert_eq!(sends.len(), 2);
        for (target, line) in &sends {
            assert_eq!(target, "#news");
            assert!(line.starts_with("I'm not very smart"));
        }
    }

    #[tokio::test]
    async fn unaddressed_channel_message_is_ignored() {
        let mock = Arc::new(MockChatClient::new("parrot"));
        let (bridge, _consumer) = bridge_with(&mock, test_config(&[]));
        let mut matcher = AddressMatcher::new("parrot").unwrap();

        bridge
            .handle_event(
                ChatEvent::Message {
                    target: "#news".to_string(),
                    sender: "alice".to_string(),
                    text: "parroting along".to_string(),
                },
                &mut matcher,
            )
            .await;
        assert!(mock.sends().is_empty());
    }

    #[tokio::test]
    async fn direct_message_always_gets_a_reply_to_the_sender() {
        let mock = Arc::new(MockChatClient::new("parrot"));
        let (bridge, _consumer) = bridge_with(&mock, test_config(&[]));
        let mut matcher = AddressMatcher::new("parrot").unwrap();

        bridge
            .handle_event(
                ChatEvent::Message {
                    target: "parrot".to_string(),
                    sender: "alice".to_string(),
                    text: "anything at all".to_string(),
                },
                &mut matcher,
            )
            .await;

        let sends = mock.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, "alice");
    }

    #[tokio::test]
    async fn delivery_loop_preserves_queue_order() {
        let mock = Arc::new(MockChatClient::new("parrot").joined(&["#news"]));
        let (bridge, consumer) = bridge_with(&mock, test_config(&[]));
        bridge.set_state(ConnectionState::Connected);

        for i in 0..5 {
            bridge.submit("news", Bytes::from(format!("msg{i}")));
        }
        let task = tokio::spawn(bridge.clone().run_delivery(consumer));

        timeout(Duration::from_secs(2), async {
            while mock.sends().len() < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("delivery task stalled");

        let lines: Vec<String> = mock.sends().into_iter().map(|(_, line)| line).collect();
        assert_eq!(lines, vec!["msg0", "msg1", "msg2", "msg3", "msg4"]);
        task.abort();
    }
}
