//! Log Publisher - Writes Outbound Events to the Trace Log
//!
//! Default publisher for local runs without a broker.

use async_trait::async_trait;
use tracing::info;

use crate::ports::EventPublisher;

/// Publisher that logs every event and always succeeds.
#[derive(Debug, Default, Clone)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn send(&self, topic: &str, key: &str, value: &[u8]) -> anyhow::Result<()> {
        info!(
            topic,
            key,
            payload = %String::from_utf8_lossy(value),
            "Event published"
        );
        Ok(())
    }
}
