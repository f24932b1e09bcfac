//! Match Settlement - Atomic Application of Decided Trades
//!
//! Settles one trade decision from the matching process:
//! 1. Skip decisions whose trade id was already settled
//! 2. Load the pair, the taker order and the maker order
//! 3. Fill both orders by the trade quantity and recompute their status
//! 4. Credit the counter-asset to both parties
//! 5. Persist both orders and append the match record
//!
//! Steps 2-5 run in one store transaction. Any failure drops it, so no
//! partial fill, credit or match record is ever committed.
//!
//! Decisions reach the service either by direct call (`settle_match`) or
//! through an in-process channel drained by `run`, which is where a
//! matching-process consumer hands them over.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::SettlementConfig;
use crate::domain::error::StageExt;
use crate::domain::{ExchangeError, Match, Order, OrderId, TradeDecision};
use crate::ports::{Store, StoreTx};

/// Result of a settlement that committed.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementReceipt {
  /// The appended match record.
  pub record: Match,
  /// Taker order after the fill.
  pub taker: Order,
  /// Maker order after the fill.
  pub maker: Order,
}

/// Outcome of a settlement request.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
  /// The trade was applied.
  Applied(SettlementReceipt),
  /// The trade id was already settled; nothing changed.
  Duplicate,
}

impl SettlementOutcome {
  fn label(&self) -> &'static str {
    match self {
      Self::Applied(_) => "applied",
      Self::Duplicate => "duplicate",
    }
  }
}

/// Settles trade decisions against orders and wallets.
pub struct MatchSettlement<S: Store> {
  store: Arc<S>,
  /// Deadline applied when the caller gives none.
  default_timeout: Duration,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl<S: Store> MatchSettlement<S> {
  /// Create a new settlement service.
  pub fn new(store: Arc<S>, config: &SettlementConfig) -> Self {
    Self {
      store,
      default_timeout: config.request_timeout(),
      metrics: None,
    }
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Settle a trade decision under the configured deadline.
  pub async fn settle_match(
    &self,
    decision: &TradeDecision,
  ) -> Result<SettlementOutcome, ExchangeError> {
    self.settle_match_within(decision, self.default_timeout).await
  }

  /// Settle a trade decision under a caller-supplied deadline.
  #[instrument(
    skip(self, decision),
    fields(
      trade_id = %decision.trade_id,
      taker = decision.taker_order_id,
      maker = decision.maker_order_id,
      quantity = %decision.quantity
    )
  )]
  pub async fn settle_match_within(
    &self,
    decision: &TradeDecision,
    deadline: Duration,
  ) -> Result<SettlementOutcome, ExchangeError> {
    let started = Instant::now();

    let result = match tokio::time::timeout(deadline, self.settle(decision)).await {
      Ok(result) => result,
      Err(_) => Err(ExchangeError::Timeout(deadline)),
    };

    match &result {
      Ok(SettlementOutcome::Applied(receipt)) => info!(
        match_id = %receipt.record.id,
        taker_status = ?receipt.taker.status,
        maker_status = ?receipt.maker.status,
        "Trade settled"
      ),
      Ok(SettlementOutcome::Duplicate) => {
        warn!("Trade decision already settled, ignoring replay");
      }
      Err(e) if e.is_client_error() => {
        warn!(reason = e.reason(), error = %e, "Trade decision rejected");
      }
      Err(e) => error!(reason = e.reason(), error = %e, "Settlement failed, rolled back"),
    }

    if let Some(metrics) = &self.metrics {
      metrics
        .latency_us
        .with_label_values(&["settle_match"])
        .observe(started.elapsed().as_micros() as f64);
      let outcome = match &result {
        Ok(outcome) => outcome.label(),
        Err(e) => e.reason(),
      };
      metrics.settlements.with_label_values(&[outcome]).inc();
    }

    result
  }

  /// Settle decisions from `decisions` until the channel closes or
  /// shutdown is signalled.
  ///
  /// Each decision is settled under the configured deadline. Failures are
  /// logged and counted by `settle_match_within`; the loop keeps going.
  pub async fn run(
    &self,
    mut decisions: mpsc::Receiver<TradeDecision>,
    mut shutdown_rx: broadcast::Receiver<()>,
  ) -> Result<()> {
    info!("Settlement consumer started");

    loop {
      let decision = tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Settlement consumer received shutdown signal");
          break;
        }
        decision = decisions.recv() => match decision {
          Some(decision) => decision,
          None => {
            debug!("Trade decision channel closed");
            break;
          }
        },
      };
      let _ = self.settle_match(&decision).await;
    }

    info!("Settlement consumer stopped");
    Ok(())
  }

  async fn settle(&self, decision: &TradeDecision) -> Result<SettlementOutcome, ExchangeError> {
    decision.validate().map_err(ExchangeError::InvalidTrade)?;

    let mut tx = self.store.begin().await.stage("begin transaction")?;

    if tx
      .is_trade_settled(decision.trade_id)
      .await
      .stage("check trade id")?
    {
      return Ok(SettlementOutcome::Duplicate);
    }

    let pair = tx
      .pair_by_id(decision.pair_id)
      .await
      .stage("load pair")?
      .ok_or_else(|| ExchangeError::PairNotFound {
        pair: decision.pair_id.to_string(),
      })?;

    let mut taker = load_order(tx.as_mut(), decision.taker_order_id).await?;
    let mut maker = load_order(tx.as_mut(), decision.maker_order_id).await?;

    for order in [&taker, &maker] {
      if order.pair_id != pair.id {
        return Err(ExchangeError::InvalidTrade(format!(
          "order {} belongs to pair {}, not {}",
          order.id, order.pair_id, pair.code
        )));
      }
    }

    taker.apply_fill(decision.quantity)?;
    maker.apply_fill(decision.quantity)?;

    for credit in decision.credits(&pair, &taker, &maker) {
      tx.adjust_wallet(credit.user_id, credit.asset_id, credit.amount)
        .await
        .stage("credit wallet")?;
    }

    tx.update_order(&taker).await.stage("update taker order")?;
    tx.update_order(&maker).await.stage("update maker order")?;

    let record = decision.to_match();
    tx.save_match(&record).await.stage("save match")?;

    tx.commit().await.stage("commit settlement")?;

    Ok(SettlementOutcome::Applied(SettlementReceipt {
      record,
      taker,
      maker,
    }))
  }
}

async fn load_order(tx: &mut dyn StoreTx, id: OrderId) -> Result<Order, ExchangeError> {
  tx.order(id)
    .await
    .stage("load order")?
    .ok_or(ExchangeError::OrderNotFound { order_id: id })
}
