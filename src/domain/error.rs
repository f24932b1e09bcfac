//! Error taxonomy for order intake and settlement.
//!
//! Domain errors are raised before anything is committed and are never
//! retried. Infrastructure errors and timeouts also leave no committed
//! state behind because every write happens inside one store transaction,
//! so callers may retry them.

use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use super::ledger::{AssetId, UserId};
use super::order::{FillError, OrderId};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("account not found: {email}")]
    AccountNotFound { email: String },

    #[error("account {user_id} is blocked")]
    AccountBlocked { user_id: UserId },

    #[error("trading pair not found: {pair}")]
    PairNotFound { pair: String },

    #[error("wallet not found for user {user_id}, asset {asset_id}")]
    WalletNotFound { user_id: UserId, asset_id: AssetId },

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: OrderId },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("invalid trade: {0}")]
    InvalidTrade(String),

    #[error(transparent)]
    Overfill(#[from] FillError),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{stage} failed: {source:#}")]
    Infrastructure {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ExchangeError {
    /// Whether the failure is the caller's fault and must not be retried.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Timeout(_) | Self::Infrastructure { .. })
    }

    /// Stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::AccountNotFound { .. } => "account_not_found",
            Self::AccountBlocked { .. } => "account_blocked",
            Self::PairNotFound { .. } => "pair_not_found",
            Self::WalletNotFound { .. } => "wallet_not_found",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::OrderNotFound { .. } => "order_not_found",
            Self::InvalidOrder(_) => "invalid_order",
            Self::InvalidTrade(_) => "invalid_trade",
            Self::Overfill(_) => "overfill",
            Self::Timeout(_) => "timeout",
            Self::Infrastructure { .. } => "infrastructure",
        }
    }
}

/// Attach the failing stage to a port error.
pub trait StageExt<T> {
    fn stage(self, stage: &'static str) -> Result<T, ExchangeError>;
}

impl<T> StageExt<T> for anyhow::Result<T> {
    fn stage(self, stage: &'static str) -> Result<T, ExchangeError> {
        self.map_err(|source| ExchangeError::Infrastructure { stage, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_classification() {
        let insufficient = ExchangeError::InsufficientBalance {
            required: dec!(150),
            available: dec!(100),
        };
        assert!(insufficient.is_client_error());
        assert_eq!(insufficient.reason(), "insufficient_balance");

        let infra: Result<(), _> = Err(anyhow::anyhow!("disk full")).stage("commit");
        let infra = infra.unwrap_err();
        assert!(!infra.is_client_error());
        assert_eq!(infra.to_string(), "commit failed: disk full");

        assert!(!ExchangeError::Timeout(Duration::from_millis(5)).is_client_error());
    }
}
