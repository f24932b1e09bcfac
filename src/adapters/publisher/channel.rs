//! Channel Publisher - In-Process Delivery to a Matching Consumer
//!
//! Forwards events over a bounded tokio mpsc channel. Used when the
//! matching process runs inside the same binary, and by tests.

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ports::EventPublisher;

/// An event as received by the consumer side of the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub topic: String,
    pub key: String,
    pub value: Vec<u8>,
}

/// Publisher backed by an mpsc sender.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<PublishedEvent>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiver the consumer reads from.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PublishedEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn send(&self, topic: &str, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.tx
            .send(PublishedEvent {
                topic: topic.to_string(),
                key: key.to_string(),
                value: value.to_vec(),
            })
            .await
            .context("matching consumer channel closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_receiver() {
        let (publisher, mut rx) = ChannelPublisher::new(4);
        publisher.send("BTC-USDT", "7", b"{}").await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "BTC-USDT");
        assert_eq!(event.key, "7");
        assert_eq!(event.value, b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_send_fails_when_consumer_gone() {
        let (publisher, rx) = ChannelPublisher::new(1);
        drop(rx);
        assert!(publisher.send("BTC-USDT", "7", b"{}").await.is_err());
    }
}
