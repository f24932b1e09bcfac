//! Store Port - Transactional Wallet Ledger and Order Store
//!
//! Wallets, orders, match records and the outbox live behind a single
//! transaction handle. Every multi-row change made by a use case goes
//! through one `StoreTx` and becomes visible only on `commit`; dropping
//! the handle rolls everything back.
//!
//! Isolation must be at least read-committed with row locks on wallets
//! read for a debit. The reference adapter serialises transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
  AssetId, CryptoPair, Match, Order, OrderDraft, OrderId, PairId, TradeId,
  UserId, Wallet,
};

/// Outbox event id, assigned by the store in enqueue order.
pub type EventId = u64;

/// An event to deliver downstream once its transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
  /// Destination topic (the pair code for admitted orders).
  pub topic: String,
  /// Partition key (the order id for admitted orders).
  pub key: String,
  /// JSON payload.
  pub payload: String,
}

impl OutboxEvent {
  /// Event announcing a newly admitted order to the matching process.
  pub fn order_admitted(pair: &CryptoPair, order: &Order) -> anyhow::Result<Self> {
    Ok(Self {
      topic: pair.code.clone(),
      key: order.id.to_string(),
      payload: serde_json::to_string(order)?,
    })
  }
}

/// An outbox event with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
  pub id: EventId,
  pub event: OutboxEvent,
  /// Failed delivery attempts so far.
  pub attempts: u32,
  /// Last delivery error, if any.
  pub last_error: Option<String>,
  pub enqueued_at: DateTime<Utc>,
}

/// An open store transaction.
///
/// Reads observe the transaction's own writes. Nothing is visible to
/// other transactions until `commit` succeeds.
#[async_trait]
pub trait StoreTx: Send {
  /// Look up a trading pair by its code.
  async fn pair_by_code(&mut self, code: &str) -> anyhow::Result<Option<CryptoPair>>;

  /// Look up a trading pair by id.
  async fn pair_by_id(&mut self, id: PairId) -> anyhow::Result<Option<CryptoPair>>;

  /// Load an order.
  async fn order(&mut self, id: OrderId) -> anyhow::Result<Option<Order>>;

  /// Read a wallet, locking it for the rest of the transaction.
  async fn wallet(
    &mut self,
    user_id: UserId,
    asset_id: AssetId,
  ) -> anyhow::Result<Option<Wallet>>;

  /// Apply a signed delta to a wallet and return the new balance.
  ///
  /// # Errors
  /// Fails if the result would be negative, or if the delta is negative
  /// and the wallet does not exist. A positive delta on a missing wallet
  /// opens it.
  async fn adjust_wallet(
    &mut self,
    user_id: UserId,
    asset_id: AssetId,
    delta: Decimal,
  ) -> anyhow::Result<Decimal>;

  /// Insert a new order and return it with its assigned id.
  async fn insert_order(&mut self, draft: OrderDraft) -> anyhow::Result<Order>;

  /// Replace an existing order's fill state.
  async fn update_order(&mut self, order: &Order) -> anyhow::Result<()>;

  /// Whether a trade decision was already settled.
  async fn is_trade_settled(&mut self, trade_id: TradeId) -> anyhow::Result<bool>;

  /// Append a match record. Fails on a duplicate trade id.
  async fn save_match(&mut self, record: &Match) -> anyhow::Result<()>;

  /// Queue an event for delivery after commit.
  async fn enqueue_event(&mut self, event: OutboxEvent) -> anyhow::Result<EventId>;

  /// Make every write of this transaction durable and visible.
  async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}

/// Trait for transactional store providers.
#[async_trait]
pub trait Store: Send + Sync + 'static {
  /// Open a transaction.
  async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>>;

  /// Undelivered outbox events, oldest first.
  async fn pending_events(&self, limit: usize) -> anyhow::Result<Vec<OutboxRecord>>;

  /// Mark an outbox event as delivered; it is no longer pending.
  async fn mark_delivered(&self, id: EventId) -> anyhow::Result<()>;

  /// Record a failed delivery attempt.
  async fn record_delivery_failure(&self, id: EventId, error: &str) -> anyhow::Result<()>;

  /// Check if the store is usable.
  async fn is_healthy(&self) -> bool;
}
