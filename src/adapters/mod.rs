//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! infrastructure. Each sub-module groups adapters by concern.
//!
//! Adapter categories:
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: Transactional ledger store with a journal and JSON snapshots
//! - `publisher`: Outbox event delivery (log, channel, Redis Streams)

pub mod metrics;
pub mod persistence;
pub mod publisher;
