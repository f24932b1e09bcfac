//! Domain layer - Core business types and rules.
//!
//! Orders, wallets, trading pairs, trade decisions and the error taxonomy.
//! No I/O here (hexagonal architecture inner ring); everything is
//! serializable and testable in isolation.

pub mod error;
pub mod ledger;
pub mod order;
pub mod trade;

// Re-export core types for convenience
pub use error::ExchangeError;
pub use ledger::{AssetId, CryptoPair, PairId, User, UserId, Wallet};
pub use order::{
    Order, OrderDraft, OrderId, OrderRequest, OrderSide, OrderStatus, OrderType,
};
pub use trade::{Match, TradeDecision, TradeId};
