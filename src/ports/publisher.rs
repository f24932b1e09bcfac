//! Event Publisher Port - Downstream Delivery to the Matching Process
//!
//! Callers assume at-least-once delivery: the outbox dispatcher resends an
//! event until `send` succeeds, so consumers must tolerate duplicates.

use async_trait::async_trait;

/// Trait for event publishers.
#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
  /// Send one event.
  async fn send(&self, topic: &str, key: &str, value: &[u8]) -> anyhow::Result<()>;
}
