//! Ledger reference types: users, trading pairs and wallets.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::OrderSide;

pub type UserId = u64;
pub type PairId = u64;
pub type AssetId = u64;

/// A user as seen by the core. Owned by the identity system; only the id
/// and the active flag matter here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// `false` means the account is blocked.
    pub active: bool,
}

/// A tradable instrument: primary asset quoted in the secondary asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoPair {
    pub id: PairId,
    pub code: String,
    pub primary_asset: AssetId,
    pub secondary_asset: AssetId,
}

impl CryptoPair {
    /// Asset whose wallet funds an order on `side`: the quote asset for
    /// a buy, the base asset for a sell.
    pub fn funding_asset(&self, side: OrderSide) -> AssetId {
        match side {
            OrderSide::Buy => self.secondary_asset,
            OrderSide::Sell => self.primary_asset,
        }
    }
}

/// Balance of one asset held by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub balance: Decimal,
}

impl Wallet {
    pub fn covers(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_funding_asset_by_side() {
        let pair = CryptoPair {
            id: 1,
            code: "BTC-USDT".to_string(),
            primary_asset: 10,
            secondary_asset: 20,
        };
        assert_eq!(pair.funding_asset(OrderSide::Buy), 20);
        assert_eq!(pair.funding_asset(OrderSide::Sell), 10);
    }

    #[test]
    fn test_wallet_covers() {
        let wallet = Wallet {
            user_id: 1,
            asset_id: 20,
            balance: dec!(100),
        };
        assert!(wallet.covers(dec!(100)));
        assert!(!wallet.covers(dec!(100.01)));
    }
}
