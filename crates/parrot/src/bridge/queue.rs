//! The outbound message queue between HTTP producers and the delivery task.

use bytes::Bytes;
use tokio::sync::mpsc;

/// One accepted message on its way to the chat connection.
///
/// Constructed by the ingress, consumed exactly once by the delivery task,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination channel, without the protocol prefix.
    pub target: String,
    /// Message body; may contain embedded newlines, each of which becomes
    /// its own protocol send.
    pub payload: Bytes,
}

/// Producer side of the queue: unbounded, ordered, safe to share across any
/// number of tasks. Enqueueing never blocks.
#[derive(Clone)]
pub struct MessageQueue {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

/// Consumer side: exactly one, created together with its queue.
pub struct MessageConsumer {
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl MessageQueue {
    pub fn channel() -> (MessageQueue, MessageConsumer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MessageQueue { tx }, MessageConsumer { rx })
    }

    pub fn enqueue(&self, msg: OutboundMessage) {
        // Fails only when the consumer is gone, which means the process is
        // shutting down; the message is dropped with it.
        let _ = self.tx.send(msg);
    }
}

impl MessageConsumer {
    /// Wait for the next message. Returns `None` once every producer handle
    /// has been dropped.
    pub async fn dequeue(&mut self) -> Option<OutboundMessage> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(target: &str, payload: &str) -> OutboundMessage {
        OutboundMessage {
            target: target.to_string(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    #[tokio::test]
    async fn fifo_order_from_one_producer() {
        let (queue, mut consumer) = MessageQueue::channel();
        queue.enqueue(msg("news", "first"));
        queue.enqueue(msg("news", "second"));
        queue.enqueue(msg("ops", "third"));

        assert_eq!(consumer.dequeue().await, Some(msg("news", "first")));
        assert_eq!(consumer.dequeue().await, Some(msg("news", "second")));
        assert_eq!(consumer.dequeue().await, Some(msg("ops", "third")));
    }

    #[tokio::test]
    async fn concurrent_producers_all_delivered() {
        let (queue, mut consumer) = MessageQueue::channel();

        let mut handles = Vec::new();
        for producer in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    queue.enqueue(msg("news", &format!("{producer}-{i}")));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        drop(queue);

        let mut count = 0;
        while consumer.dequeue().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 200);
    }

    #[tokio::test]
    async fn per_producer_order_preserved() {
        let (queue, mut consumer) = MessageQueue::channel();
        let writer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    queue.enqueue(msg("news", &i.to_string()));
                }
            })
        };
        writer.await.unwrap();
        drop(queue);

        let mut seen = Vec::new();
        while let Some(m) = consumer.dequeue().await {
            seen.push(String::from_utf8_lossy(&m.payload).parse::<u32>().unwrap());
        }
        let sorted = {
            let mut s = seen.clone();
            s.sort_unstable();
            s
        };
        assert_eq!(seen, sorted);
    }
}
