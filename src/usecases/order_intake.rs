//! Order Intake - Admission of New Orders
//!
//! Admission flow, all inside one store transaction:
//! 1. Validate the request and resolve the caller's account
//! 2. Resolve the trading pair and the funding wallet
//! 3. Check the wallet covers the cost, then debit it
//! 4. Insert the order in `Progress`
//! 5. Queue the order event in the outbox
//!
//! The balance check, the debit and the insert share the transaction's
//! wallet lock, so concurrent orders from one user cannot spend the same
//! funds twice. Delivery to the matching process happens after commit via
//! the outbox dispatcher; a broker outage never fails an admitted order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::IntakeConfig;
use crate::domain::error::StageExt;
use crate::domain::{ExchangeError, Order, OrderRequest};
use crate::ports::{Identity, OutboxEvent, Store, UserDirectory};

/// Admits orders against the caller's wallet.
pub struct OrderIntake<S: Store, U: UserDirectory> {
  store: Arc<S>,
  users: Arc<U>,
  /// Deadline applied when the caller gives none.
  default_timeout: Duration,
  /// Wakes the outbox dispatcher after each admission.
  outbox_waker: Option<Arc<Notify>>,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl<S: Store, U: UserDirectory> OrderIntake<S, U> {
  /// Create a new order intake.
  pub fn new(store: Arc<S>, users: Arc<U>, config: &IntakeConfig) -> Self {
    Self {
      store,
      users,
      default_timeout: config.request_timeout(),
      outbox_waker: None,
      metrics: None,
    }
  }

  /// Wake the given dispatcher signal after every committed admission.
  pub fn with_outbox_waker(mut self, waker: Arc<Notify>) -> Self {
    self.outbox_waker = Some(waker);
    self
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Admit an order under the configured deadline.
  pub async fn process_order(
    &self,
    identity: &Identity,
    request: &OrderRequest,
  ) -> Result<Order, ExchangeError> {
    self
      .process_order_within(identity, request, self.default_timeout)
      .await
  }

  /// Admit an order under a caller-supplied deadline.
  ///
  /// On expiry the open transaction is dropped, so nothing is applied.
  #[instrument(
    skip(self, identity, request),
    fields(user = %identity.email, pair = %request.pair_code, side = %request.side)
  )]
  pub async fn process_order_within(
    &self,
    identity: &Identity,
    request: &OrderRequest,
    deadline: Duration,
  ) -> Result<Order, ExchangeError> {
    let started = Instant::now();

    let result = match tokio::time::timeout(deadline, self.admit(identity, request)).await {
      Ok(result) => result,
      Err(_) => Err(ExchangeError::Timeout(deadline)),
    };

    match &result {
      Ok(order) => {
        info!(
          order_id = order.id,
          quantity = %order.quantity,
          price = %order.price,
          "Order admitted"
        );
        if let Some(waker) = &self.outbox_waker {
          waker.notify_one();
        }
      }
      Err(e) if e.is_client_error() => {
        warn!(reason = e.reason(), error = %e, "Order rejected");
      }
      Err(e) => {
        error!(reason = e.reason(), error = %e, "Order admission failed");
      }
    }

    self.record(request, &result, started);
    result
  }

  async fn admit(
    &self,
    identity: &Identity,
    request: &OrderRequest,
  ) -> Result<Order, ExchangeError> {
    request.validate().map_err(ExchangeError::InvalidOrder)?;

    // Account lookup happens before the transaction; it mutates nothing.
    let user = self
      .users
      .find_by_email(&identity.email)
      .await
      .stage("find user")?
      .ok_or_else(|| ExchangeError::AccountNotFound {
        email: identity.email.clone(),
      })?;
    if !user.active {
      return Err(ExchangeError::AccountBlocked { user_id: user.id });
    }

    let mut tx = self.store.begin().await.stage("begin transaction")?;

    let pair = tx
      .pair_by_code(&request.pair_code)
      .await
      .stage("load pair")?
      .ok_or_else(|| ExchangeError::PairNotFound {
        pair: request.pair_code.clone(),
      })?;

    let reservation = request
      .reservation(&pair)
      .map_err(ExchangeError::InvalidOrder)?;

    let wallet = tx
      .wallet(user.id, reservation.asset_id)
      .await
      .stage("load wallet")?
      .ok_or(ExchangeError::WalletNotFound {
        user_id: user.id,
        asset_id: reservation.asset_id,
      })?;

    if !wallet.covers(reservation.amount) {
      return Err(ExchangeError::InsufficientBalance {
        required: reservation.amount,
        available: wallet.balance,
      });
    }

    tx.adjust_wallet(user.id, reservation.asset_id, -reservation.amount)
      .await
      .stage("debit wallet")?;

    let order = tx
      .insert_order(request.to_draft(user.id, pair.id, Utc::now()))
      .await
      .stage("insert order")?;

    let event = OutboxEvent::order_admitted(&pair, &order).stage("encode order event")?;
    tx.enqueue_event(event).await.stage("enqueue order event")?;

    tx.commit().await.stage("commit admission")?;
    Ok(order)
  }

  fn record(&self, request: &OrderRequest, result: &Result<Order, ExchangeError>, started: Instant) {
    let Some(metrics) = &self.metrics else {
      return;
    };

    metrics
      .latency_us
      .with_label_values(&["process_order"])
      .observe(started.elapsed().as_micros() as f64);

    match result {
      Ok(_) => {
        let side = request.side.to_string();
        metrics
          .orders_admitted
          .with_label_values(&[request.pair_code.as_str(), side.as_str()])
          .inc();
      }
      Err(e) => metrics
        .orders_rejected
        .with_label_values(&[e.reason()])
        .inc(),
    }
  }
}
