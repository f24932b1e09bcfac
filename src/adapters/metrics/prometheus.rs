//! Prometheus Metrics Registry - Intake and Settlement Observability
//!
//! Registers and exposes Prometheus metrics for order admission,
//! settlement and outbox delivery.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Centralized Prometheus metrics for the service.
///
/// All metrics follow the naming convention `order_settlement_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Orders admitted, by pair and side.
    pub orders_admitted: IntCounterVec,
    /// Orders rejected, by reason.
    pub orders_rejected: IntCounterVec,
    /// Settlement attempts, by outcome (applied, duplicate, or error reason).
    pub settlements: IntCounterVec,
    /// Outbox events handed to the publisher.
    pub events_published: IntCounterVec,
    /// Outbox delivery failures.
    pub events_failed: IntCounterVec,
    /// Outbox events still pending after the last dispatch pass.
    pub outbox_pending: IntGauge,
    /// Use case latency (microseconds), by operation.
    pub latency_us: HistogramVec,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_admitted = IntCounterVec::new(
            Opts::new("order_settlement_orders_admitted_total", "Orders admitted"),
            &["pair", "side"],
        )?;

        let orders_rejected = IntCounterVec::new(
            Opts::new("order_settlement_orders_rejected_total", "Orders rejected"),
            &["reason"],
        )?;

        let settlements = IntCounterVec::new(
            Opts::new("order_settlement_settlements_total", "Settlement attempts"),
            &["outcome"],
        )?;

        let events_published = IntCounterVec::new(
            Opts::new(
                "order_settlement_events_published_total",
                "Outbox events delivered to the publisher",
            ),
            &["topic"],
        )?;

        let events_failed = IntCounterVec::new(
            Opts::new(
                "order_settlement_events_failed_total",
                "Outbox delivery attempts that failed",
            ),
            &["topic"],
        )?;

        let outbox_pending = IntGauge::new(
            "order_settlement_outbox_pending",
            "Outbox events awaiting delivery",
        )?;

        let latency_us = HistogramVec::new(
            HistogramOpts::new(
                "order_settlement_latency_us",
                "Use case latency in microseconds",
            )
            .buckets(vec![
                50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0, 50000.0, 250_000.0,
            ]),
            &["operation"],
        )?;

        registry.register(Box::new(orders_admitted.clone()))?;
        registry.register(Box::new(orders_rejected.clone()))?;
        registry.register(Box::new(settlements.clone()))?;
        registry.register(Box::new(events_published.clone()))?;
        registry.register(Box::new(events_failed.clone()))?;
        registry.register(Box::new(outbox_pending.clone()))?;
        registry.register(Box::new(latency_us.clone()))?;

        Ok(Self {
            registry,
            orders_admitted,
            orders_rejected,
            settlements,
            events_published,
            events_failed,
            outbox_pending,
            latency_us,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics
            .orders_rejected
            .with_label_values(&["insufficient_balance"])
            .inc();
        let body = metrics.render().unwrap();
        assert!(body.contains("order_settlement_orders_rejected_total"));
        assert!(body.contains("insufficient_balance"));
    }
}
