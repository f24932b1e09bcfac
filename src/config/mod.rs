//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`. Timeouts,
//! outbox cadence, publisher selection and bootstrap reference data are
//! externalized here - nothing is hardcoded in the usecases layer.

pub mod loader;

use std::time::Duration;

use serde::Deserialize;

use crate::domain::{CryptoPair, User, Wallet};

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  pub service: ServiceConfig,
  /// Order intake parameters.
  #[serde(default)]
  pub intake: IntakeConfig,
  /// Match settlement parameters.
  #[serde(default)]
  pub settlement: SettlementConfig,
  /// Outbox dispatcher parameters.
  #[serde(default)]
  pub outbox: OutboxConfig,
  /// Downstream publisher selection.
  #[serde(default)]
  pub publisher: PublisherConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Persistence configuration.
  #[serde(default)]
  pub persistence: PersistenceConfig,
  /// Reference data loaded into an empty store.
  #[serde(default)]
  pub seed: SeedConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Order intake configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
  /// Default deadline for one admission (milliseconds).
  #[serde(default = "default_request_timeout")]
  pub request_timeout_ms: u64,
}

impl Default for IntakeConfig {
  fn default() -> Self {
    Self {
      request_timeout_ms: default_request_timeout(),
    }
  }
}

impl IntakeConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }
}

/// Match settlement configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
  /// Default deadline for one settlement (milliseconds).
  #[serde(default = "default_request_timeout")]
  pub request_timeout_ms: u64,
}

impl Default for SettlementConfig {
  fn default() -> Self {
    Self {
      request_timeout_ms: default_request_timeout(),
    }
  }
}

impl SettlementConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }
}

/// Outbox dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
  /// Maximum events delivered per dispatch pass.
  #[serde(default = "default_batch_size")]
  pub batch_size: usize,
  /// Interval between dispatch passes when nothing wakes the dispatcher.
  #[serde(default = "default_dispatch_interval")]
  pub dispatch_interval_ms: u64,
}

impl Default for OutboxConfig {
  fn default() -> Self {
    Self {
      batch_size: default_batch_size(),
      dispatch_interval_ms: default_dispatch_interval(),
    }
  }
}

impl OutboxConfig {
  pub fn dispatch_interval(&self) -> Duration {
    Duration::from_millis(self.dispatch_interval_ms)
  }
}

/// Which publisher delivers outbox events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
  /// Log events only.
  #[default]
  Log,
  /// Redis Streams.
  Redis,
}

/// Publisher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
  #[serde(default)]
  pub kind: PublisherKind,
  /// Redis connection URL (required for `redis`).
  pub redis_url: Option<String>,
  /// Prefix prepended to the topic to form the stream name.
  #[serde(default = "default_stream_prefix")]
  pub stream_prefix: String,
}

impl Default for PublisherConfig {
  fn default() -> Self {
    Self {
      kind: PublisherKind::default(),
      redis_url: None,
      stream_prefix: default_stream_prefix(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: default_true(),
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for the ledger snapshot and journal.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
  /// Persist every commit to disk. When false the ledger is volatile.
  #[serde(default = "default_true")]
  pub durable: bool,
  /// Journal entries appended before the snapshot is rewritten and the
  /// journal truncated.
  #[serde(default = "default_compact_after")]
  pub compact_after: u64,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
      durable: default_true(),
      compact_after: default_compact_after(),
    }
  }
}

/// Bootstrap reference data.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
  #[serde(default)]
  pub users: Vec<User>,
  #[serde(default)]
  pub pairs: Vec<CryptoPair>,
  #[serde(default)]
  pub wallets: Vec<Wallet>,
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_request_timeout() -> u64 {
  5_000
}

fn default_batch_size() -> usize {
  100
}

fn default_dispatch_interval() -> u64 {
  500
}

fn default_stream_prefix() -> String {
  "orders.".to_string()
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}

fn default_data_dir() -> String {
  "data".to_string()
}

fn default_compact_after() -> u64 {
  10_000
}
