//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires from
//! the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `Store`: Transactional wallet ledger, order store and outbox
//! - `UserDirectory`: Resolution of the authenticated caller
//! - `EventPublisher`: Delivery of admitted orders to matching

pub mod identity;
pub mod publisher;
pub mod store;

pub use identity::{Identity, UserDirectory};
pub use publisher::EventPublisher;
pub use store::{EventId, OutboxEvent, OutboxRecord, Store, StoreTx};
