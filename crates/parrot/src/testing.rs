//! Test double for the chat capability, shared by bridge and handler tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use parrot_chat_protocol::{ChatClient, ChatError};

/// One recorded interaction with the mock, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Connect,
    Join(String),
    Send { target: String, line: String },
}

/// A scriptable in-memory [`ChatClient`].
pub(crate) struct MockChatClient {
    nick: Mutex<String>,
    joined: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
    connected: AtomicBool,
    fail_next_connects: AtomicUsize,
    fail_sends: AtomicBool,
}

impl MockChatClient {
    pub(crate) fn new(nick: &str) -> Self {
        Self {
            nick: Mutex::new(nick.to_string()),
            joined: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            fail_next_connects: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Pre-populate channel membership.
    pub(crate) fn joined(self, channels: &[&str]) -> Self {
        {
            let mut joined = self.joined.lock().unwrap();
            for channel in channels {
                joined.insert((*channel).to_string());
            }
        }
        self
    }

    pub(crate) fn fail_next_connects(&self, n: usize) {
        self.fail_next_connects.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn sends(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { target, line } => Some((target, line)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.calls()
            .into_iter()
            .filter(|call| *call == Call::Connect)
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn connect(&self) -> Result<(), ChatError> {
        self.record(Call::Connect);
        let remaining = self.fail_next_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_connects
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ChatError::Connect(std::io::Error::other(
                "connection refused",
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, target: &str, line: &str) -> Result<(), ChatError> {
        self.record(Call::Send {
            target: target.to_string(),
            line: line.to_string(),
        });
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::NotConnected);
        }
        Ok(())
    }

    async fn join(&self, target: &str) -> Result<(), ChatError> {
        self.record(Call::Join(target.to_string()));
        self.joined.lock().unwrap().insert(target.to_string());
        Ok(())
    }

    fn is_joined(&self, target: &str) -> bool {
        self.joined.lock().unwrap().contains(target)
    }

    fn joined_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.joined.lock().unwrap().iter().cloned().collect();
        channels.sort();
        channels
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn current_nick(&self) -> String {
        self.nick.lock().unwrap().clone()
    }
}
