//! Redis Streams Publisher
//!
//! Appends each event to the stream `<prefix><topic>` with `XADD`, using
//! the event key and value as entry fields. The matching process reads
//! the per-pair stream with a consumer group.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info, instrument};

use crate::ports::EventPublisher;

/// Publisher writing to Redis Streams.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    connection: MultiplexedConnection,
    stream_prefix: String,
}

impl RedisStreamPublisher {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str, stream_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("Invalid Redis URL: {redis_url}"))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        info!(stream_prefix, "Redis Streams publisher connected");

        Ok(Self {
            connection,
            stream_prefix: stream_prefix.to_string(),
        })
    }

    fn stream_name(&self, topic: &str) -> String {
        format!("{}{}", self.stream_prefix, topic)
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn send(&self, topic: &str, key: &str, value: &[u8]) -> Result<()> {
        let stream = self.stream_name(topic);
        let mut conn = self.connection.clone();

        let entry_id: String = conn
            .xadd(&stream, "*", &[("key", key.as_bytes()), ("value", value)])
            .await
            .with_context(|| format!("XADD to {stream} failed"))?;

        debug!(stream = %stream, entry_id = %entry_id, "Event appended to stream");
        Ok(())
    }
}
