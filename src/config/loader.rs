//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::info;

use super::{AppConfig, PublisherKind};

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
  let path = path.as_ref();

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    pairs = config.seed.pairs.len(),
    publisher = ?config.publisher.kind,
    durable = config.persistence.durable,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig =
    toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(
    !config.service.name.is_empty(),
    "service.name must not be empty"
  );

  anyhow::ensure!(
    config.intake.request_timeout_ms > 0,
    "intake.request_timeout_ms must be positive"
  );
  anyhow::ensure!(
    config.settlement.request_timeout_ms > 0,
    "settlement.request_timeout_ms must be positive"
  );

  anyhow::ensure!(
    config.outbox.batch_size > 0,
    "outbox.batch_size must be positive"
  );
  anyhow::ensure!(
    config.outbox.dispatch_interval_ms > 0,
    "outbox.dispatch_interval_ms must be positive"
  );

  anyhow::ensure!(
    config.persistence.compact_after > 0,
    "persistence.compact_after must be positive"
  );

  if config.publisher.kind == PublisherKind::Redis {
    anyhow::ensure!(
      config
        .publisher
        .redis_url
        .as_deref()
        .is_some_and(|url| !url.is_empty()),
      "publisher.redis_url is required when publisher.kind = \"redis\""
    );
  }

  // Seed validation
  let mut codes = HashSet::new();
  for pair in &config.seed.pairs {
    anyhow::ensure!(!pair.code.is_empty(), "Pair {} has an empty code", pair.id);
    anyhow::ensure!(
      codes.insert(pair.code.as_str()),
      "Pair code {} is configured twice",
      pair.code
    );
    anyhow::ensure!(
      pair.primary_asset != pair.secondary_asset,
      "Pair {} uses asset {} on both legs",
      pair.code,
      pair.primary_asset
    );
  }

  let user_ids: HashSet<_> = config.seed.users.iter().map(|u| u.id).collect();
  for wallet in &config.seed.wallets {
    anyhow::ensure!(
      wallet.balance >= Decimal::ZERO,
      "Wallet for user {} asset {} has negative balance {}",
      wallet.user_id,
      wallet.asset_id,
      wallet.balance
    );
    anyhow::ensure!(
      user_ids.contains(&wallet.user_id),
      "Wallet references unknown user {}",
      wallet.user_id
    );
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINIMAL: &str = r#"
[service]
name = "order-settlement"
"#;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = parse_config(MINIMAL).unwrap();
    assert_eq!(config.service.log_level, "info");
    assert_eq!(config.intake.request_timeout_ms, 5_000);
    assert_eq!(config.outbox.batch_size, 100);
    assert_eq!(config.publisher.kind, PublisherKind::Log);
    assert!(config.persistence.durable);
    assert_eq!(config.persistence.compact_after, 10_000);
  }

  #[test]
  fn test_full_seed_parses() {
    let text = r#"
[service]
name = "order-settlement"

[publisher]
kind = "redis"
redis_url = "redis://127.0.0.1:6379"

[[seed.users]]
id = 1
email = "alice@example.com"
active = true

[[seed.pairs]]
id = 1
code = "BTC-USDT"
primary_asset = 1
secondary_asset = 2

[[seed.wallets]]
user_id = 1
asset_id = 2
balance = "100"
"#;
    let config = parse_config(text).unwrap();
    assert_eq!(config.seed.pairs[0].code, "BTC-USDT");
    assert_eq!(config.seed.wallets[0].balance, Decimal::from(100));
  }

  #[test]
  fn test_redis_without_url_rejected() {
    let text = format!("{MINIMAL}\n[publisher]\nkind = \"redis\"\n");
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_wallet_for_unknown_user_rejected() {
    let text = format!(
      "{MINIMAL}\n[[seed.wallets]]\nuser_id = 9\nasset_id = 1\nbalance = \"1\"\n"
    );
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_zero_compaction_threshold_rejected() {
    let text = format!("{MINIMAL}\n[persistence]\ncompact_after = 0\n");
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_zero_batch_rejected() {
    let text = format!("{MINIMAL}\n[outbox]\nbatch_size = 0\n");
    assert!(parse_config(&text).is_err());
  }
}
