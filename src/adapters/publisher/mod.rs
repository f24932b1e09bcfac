//! Publisher Adapters - Delivery of Outbox Events
//!
//! Implements the `EventPublisher` port:
//! - `log`: trace-log only, for local runs
//! - `channel`: in-process tokio mpsc channel
//! - `redis_stream`: Redis Streams (`XADD`) for an external matcher

pub mod channel;
pub mod log;
pub mod redis_stream;

pub use channel::{ChannelPublisher, PublishedEvent};
pub use log::LogPublisher;
pub use redis_stream::RedisStreamPublisher;
