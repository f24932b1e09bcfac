//! Order Settlement — Entry Point
//!
//! Initializes configuration, logging, the ledger store and the outbox
//! delivery pipeline. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate (path overridable via ORDER_SETTLEMENT_CONFIG)
//! 2. Init tracing (JSON structured logging)
//! 3. Open the ledger store (journal + snapshot, or volatile) and seed it
//! 4. Create the downstream publisher (log or Redis Streams)
//! 5. Create OutboxDispatcher, OrderIntake and MatchSettlement
//! 6. Spawn health server, metrics server, store probe, dispatcher and
//!    the settlement consumer
//! 7. Wait for SIGINT → graceful shutdown (stop accepting → drain →
//!    compact → exit)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use order_settlement::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use order_settlement::adapters::persistence::{MemoryStore, bootstrap};
use order_settlement::adapters::publisher::{LogPublisher, RedisStreamPublisher};
use order_settlement::config::{self, AppConfig, PublisherKind};
use order_settlement::domain::TradeDecision;
use order_settlement::ports::{EventPublisher, Store};
use order_settlement::usecases::{MatchSettlement, OrderIntake, OutboxDispatcher};

const CONFIG_ENV: &str = "ORDER_SETTLEMENT_CONFIG";

/// Trade decisions buffered between the matching consumer and settlement.
const DECISION_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(&config.service.log_level)
                }),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path,
        publisher = ?config.publisher.kind,
        durable = config.persistence.durable,
        "Starting order settlement service"
    );

    // ── 3. Open and seed the ledger ─────────────────────────
    let store = Arc::new(open_store(&config).await?);
    bootstrap(
        &store,
        &config.seed.users,
        &config.seed.pairs,
        &config.seed.wallets,
    )
    .await
    .context("Failed to seed ledger")?;

    // ── 4. Downstream publisher ─────────────────────────────
    let publisher = build_publisher(&config).await?;

    // ── 5. Use cases ────────────────────────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let health = Arc::new(HealthState::new());
    let metrics = if config.metrics.enabled {
        Some(Arc::new(
            MetricsRegistry::new().context("Failed to create metrics registry")?,
        ))
    } else {
        None
    };

    let mut dispatcher = OutboxDispatcher::new(Arc::clone(&store), publisher, &config.outbox)
        .with_health_flag(Arc::clone(&health.publisher_healthy));
    if let Some(metrics) = &metrics {
        dispatcher = dispatcher.with_metrics(Arc::clone(metrics));
    }
    let dispatcher = Arc::new(dispatcher);

    let mut intake = OrderIntake::new(Arc::clone(&store), Arc::clone(&store), &config.intake)
        .with_outbox_waker(dispatcher.waker());
    let mut settlement = MatchSettlement::new(Arc::clone(&store), &config.settlement);
    if let Some(metrics) = &metrics {
        intake = intake.with_metrics(Arc::clone(metrics));
        settlement = settlement.with_metrics(Arc::clone(metrics));
    }
    // An inbound order transport takes a clone of this handle and calls
    // `process_order` per request. None is built into this binary.
    let _intake = Arc::new(intake);
    let settlement = Arc::new(settlement);

    // A matching-process consumer takes a clone of `decisions_tx` and
    // sends each decided trade; the settlement consumer applies them in
    // arrival order.
    let (decisions_tx, decisions_rx) = mpsc::channel::<TradeDecision>(DECISION_BUFFER);

    // ── 6. Background tasks ─────────────────────────────────
    let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
    let health_shutdown = shutdown_tx.subscribe();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run(health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    let metrics_handle = metrics.as_ref().map(|metrics| {
        let metrics = Arc::clone(metrics);
        let bind = config.metrics.bind_address.clone();
        let metrics_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(bind, metrics_shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        })
    });

    let probe_handle = tokio::spawn(probe_store(
        Arc::clone(&store),
        Arc::clone(&health),
        shutdown_tx.subscribe(),
    ));

    let dispatcher_shutdown = shutdown_tx.subscribe();
    let dispatcher_ref = Arc::clone(&dispatcher);
    let dispatcher_handle = tokio::spawn(async move {
        if let Err(e) = dispatcher_ref.run(dispatcher_shutdown).await {
            error!(error = %e, "Outbox dispatcher failed");
        }
    });

    let settlement_shutdown = shutdown_tx.subscribe();
    let settlement_ref = Arc::clone(&settlement);
    let settlement_handle = tokio::spawn(async move {
        if let Err(e) = settlement_ref.run(decisions_rx, settlement_shutdown).await {
            error!(error = %e, "Settlement consumer failed");
        }
    });

    info!(
        decision_buffer = DECISION_BUFFER,
        "All tasks spawned, service is running"
    );

    // ── 7. Wait for SIGINT ──────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for SIGINT, shutting down");
    } else {
        info!("SIGINT received, initiating graceful shutdown");
    }

    // 1. Readiness probe → 503, stop taking new work
    health.accepting.store(false, Ordering::Relaxed);
    drop(decisions_tx);

    // 2. Signal all tasks to stop
    let _ = shutdown_tx.send(());
    info!("Shutdown signal broadcast to all tasks");

    // 3. Let the dispatcher make its final pass (up to 10s)
    if tokio::time::timeout(Duration::from_secs(10), dispatcher_handle)
        .await
        .is_err()
    {
        warn!("Outbox dispatcher did not stop in time, pending events stay queued");
    }
    if tokio::time::timeout(Duration::from_secs(5), settlement_handle)
        .await
        .is_err()
    {
        warn!("Settlement consumer did not stop in time");
    }

    // 4. Stop servers and probe
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;
    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    probe_handle.abort();

    // 5. Fold the journal into the snapshot
    if let Err(e) = store.compact().await {
        warn!(error = %e, "Failed to compact ledger on shutdown");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Open the ledger store according to `[persistence]`.
async fn open_store(config: &AppConfig) -> Result<MemoryStore> {
    if config.persistence.durable {
        MemoryStore::durable(&config.persistence.data_dir, config.persistence.compact_after)
            .await
            .with_context(|| {
                format!("Failed to open ledger in {}", config.persistence.data_dir)
            })
    } else {
        warn!("Durable persistence disabled, ledger is lost on restart");
        Ok(MemoryStore::new())
    }
}

/// Create the publisher selected by `[publisher].kind`.
async fn build_publisher(config: &AppConfig) -> Result<Arc<dyn EventPublisher>> {
    match config.publisher.kind {
        PublisherKind::Log => Ok(Arc::new(LogPublisher::new())),
        PublisherKind::Redis => {
            let url = config
                .publisher
                .redis_url
                .as_deref()
                .context("publisher.redis_url is not set")?;
            let publisher = RedisStreamPublisher::connect(url, &config.publisher.stream_prefix)
                .await
                .context("Failed to create Redis Streams publisher")?;
            Ok(Arc::new(publisher))
        }
    }
}

/// Periodically mirror store health into the readiness state.
async fn probe_store(
    store: Arc<MemoryStore>,
    health: Arc<HealthState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let healthy = store.is_healthy().await;
                if !healthy {
                    warn!("Ledger store reported unhealthy");
                }
                health.store_healthy.store(healthy, Ordering::Relaxed);
            }
        }
    }
}
