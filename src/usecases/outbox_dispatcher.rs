//! Outbox Dispatcher - At-Least-Once Delivery of Admitted Orders
//!
//! Drains the store's outbox through the `EventPublisher` port. Events are
//! delivered oldest first; the first failure ends the pass so that later
//! events for the same key are never delivered ahead of earlier ones.
//! An event sent but not yet marked delivered is sent again on the next
//! pass, so consumers must be idempotent on the event key.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Notify, broadcast};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::OutboxConfig;
use crate::ports::{EventPublisher, Store};

/// Summary of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
  /// Events delivered and marked.
  pub delivered: usize,
  /// Events whose delivery failed (0 or 1; the pass stops at a failure).
  pub failed: usize,
  /// Events of this batch left pending.
  pub remaining: usize,
}

/// Delivers outbox events to the downstream publisher.
pub struct OutboxDispatcher<S: Store, P: EventPublisher + ?Sized> {
  store: Arc<S>,
  publisher: Arc<P>,
  batch_size: usize,
  interval: Duration,
  /// Signalled by intake after each committed admission.
  waker: Arc<Notify>,
  /// Mirrors whether the last delivery attempt succeeded.
  publisher_healthy: Option<Arc<AtomicBool>>,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl<S: Store, P: EventPublisher + ?Sized> OutboxDispatcher<S, P> {
  /// Create a new dispatcher.
  pub fn new(store: Arc<S>, publisher: Arc<P>, config: &OutboxConfig) -> Self {
    Self {
      store,
      publisher,
      batch_size: config.batch_size,
      interval: config.dispatch_interval(),
      waker: Arc::new(Notify::new()),
      publisher_healthy: None,
      metrics: None,
    }
  }

  /// Report publisher health into the given flag.
  pub fn with_health_flag(mut self, flag: Arc<AtomicBool>) -> Self {
    self.publisher_healthy = Some(flag);
    self
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Signal that wakes the run loop immediately.
  pub fn waker(&self) -> Arc<Notify> {
    Arc::clone(&self.waker)
  }

  /// Deliver one batch of pending events.
  #[instrument(skip(self))]
  pub async fn dispatch_pending(&self) -> Result<DispatchReport> {
    let pending = self
      .store
      .pending_events(self.batch_size)
      .await
      .context("Failed to read outbox")?;

    let mut report = DispatchReport::default();

    for record in &pending {
      let event = &record.event;
      match self
        .publisher
        .send(&event.topic, &event.key, event.payload.as_bytes())
        .await
      {
        Ok(()) => {
          self
            .store
            .mark_delivered(record.id)
            .await
            .with_context(|| format!("Failed to mark event {} delivered", record.id))?;
          report.delivered += 1;
          if let Some(metrics) = &self.metrics {
            metrics
              .events_published
              .with_label_values(&[event.topic.as_str()])
              .inc();
          }
        }
        Err(e) => {
          warn!(
            event_id = record.id,
            topic = %event.topic,
            key = %event.key,
            attempts = record.attempts + 1,
            error = %e,
            "Event delivery failed"
          );
          self
            .store
            .record_delivery_failure(record.id, &format!("{e:#}"))
            .await
            .with_context(|| format!("Failed to record failure of event {}", record.id))?;
          report.failed = 1;
          if let Some(metrics) = &self.metrics {
            metrics
              .events_failed
              .with_label_values(&[event.topic.as_str()])
              .inc();
          }
          break;
        }
      }
    }

    report.remaining = pending.len() - report.delivered;

    if let Some(flag) = &self.publisher_healthy {
      flag.store(report.failed == 0, Ordering::Relaxed);
    }
    if let Some(metrics) = &self.metrics {
      metrics
        .outbox_pending
        .set(i64::try_from(report.remaining).unwrap_or(i64::MAX));
    }

    if report.delivered > 0 || report.failed > 0 {
      debug!(
        delivered = report.delivered,
        failed = report.failed,
        remaining = report.remaining,
        "Dispatch pass complete"
      );
    }

    Ok(report)
  }

  /// Drain the outbox until it is empty or a delivery fails.
  async fn drain(&self) {
    loop {
      match self.dispatch_pending().await {
        Ok(report) if report.failed == 0 && report.delivered == self.batch_size => continue,
        Ok(_) => break,
        Err(e) => {
          error!(error = %e, "Outbox dispatch pass failed");
          break;
        }
      }
    }
  }

  /// Run the dispatcher until shutdown.
  ///
  /// Wakes on the intake signal or every `dispatch_interval_ms`, and makes
  /// one last pass on shutdown.
  pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
      batch_size = self.batch_size,
      interval_ms = self.interval.as_millis() as u64,
      "Outbox dispatcher started"
    );

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Outbox dispatcher received shutdown signal");
          break;
        }
        () = self.waker.notified() => {}
        _ = ticker.tick() => {}
      }
      self.drain().await;
    }

    self.drain().await;
    info!("Outbox dispatcher stopped");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::publisher::ChannelPublisher;
  use crate::adapters::persistence::MemoryStore;
  use crate::ports::OutboxEvent;

  async fn enqueue(store: &MemoryStore, keys: &[&str]) {
    let mut tx = store.begin().await.unwrap();
    for key in keys {
      tx.enqueue_event(OutboxEvent {
        topic: "BTC-USDT".to_string(),
        key: (*key).to_string(),
        payload: format!("{{\"id\":{key}}}"),
      })
      .await
      .unwrap();
    }
    tx.commit().await.unwrap();
  }

  #[tokio::test]
  async fn test_delivers_in_enqueue_order() {
    let store = Arc::new(MemoryStore::new());
    enqueue(&store, &["1", "2", "3"]).await;
    let (publisher, mut rx) = ChannelPublisher::new(8);
    let dispatcher =
      OutboxDispatcher::new(Arc::clone(&store), Arc::new(publisher), &OutboxConfig::default());

    let report = dispatcher.dispatch_pending().await.unwrap();

    assert_eq!(report, DispatchReport { delivered: 3, failed: 0, remaining: 0 });
    for expected in ["1", "2", "3"] {
      assert_eq!(rx.recv().await.unwrap().key, expected);
    }
    assert!(store.pending_events(10).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failure_keeps_event_pending() {
    let store = Arc::new(MemoryStore::new());
    enqueue(&store, &["1", "2"]).await;
    let (publisher, rx) = ChannelPublisher::new(8);
    drop(rx);
    let flag = Arc::new(AtomicBool::new(true));
    let dispatcher =
      OutboxDispatcher::new(Arc::clone(&store), Arc::new(publisher), &OutboxConfig::default())
        .with_health_flag(Arc::clone(&flag));

    let report = dispatcher.dispatch_pending().await.unwrap();

    assert_eq!(report, DispatchReport { delivered: 0, failed: 1, remaining: 2 });
    assert!(!flag.load(Ordering::Relaxed));
    let pending = store.pending_events(10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[1].attempts, 0);
  }

  #[tokio::test]
  async fn test_run_drains_on_wake_and_stops() {
    let store = Arc::new(MemoryStore::new());
    let (publisher, mut rx) = ChannelPublisher::new(8);
    let config = OutboxConfig {
      batch_size: 10,
      dispatch_interval_ms: 60_000,
    };
    let dispatcher = Arc::new(OutboxDispatcher::new(
      Arc::clone(&store),
      Arc::new(publisher),
      &config,
    ));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let runner = Arc::clone(&dispatcher);
    let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    enqueue(&store, &["7"]).await;
    dispatcher.waker().notify_one();

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(event.key, "7");

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
  }
}
