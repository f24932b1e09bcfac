//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain rules with port interfaces. Each use case is a
//! self-contained business operation.
//!
//! Use cases:
//! - `OrderIntake`: Admission of new orders against wallet balances
//! - `MatchSettlement`: Atomic settlement of decided trades
//! - `OutboxDispatcher`: Delivery of admitted orders to matching

pub mod order_intake;
pub mod outbox_dispatcher;
pub mod settlement;

pub use order_intake::OrderIntake;
pub use outbox_dispatcher::{DispatchReport, OutboxDispatcher};
pub use settlement::{MatchSettlement, SettlementOutcome, SettlementReceipt};
