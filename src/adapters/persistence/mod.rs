//! Persistence Adapters - Transactional Ledger Storage
//!
//! Implements the `Store` and `UserDirectory` ports with an in-memory
//! ledger whose transactions are serialised. Durable mode journals every
//! commit and compacts into an atomic JSON snapshot.

pub mod journal;
pub mod memory;
pub mod snapshot;

pub use journal::JournalFile;
pub use memory::{ChangeSet, LedgerState, MemoryStore, bootstrap};
pub use snapshot::SnapshotFile;
