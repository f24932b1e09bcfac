//! Trade decisions and match records.
//!
//! A `TradeDecision` arrives from the matching process once it has paired a
//! taker with a maker. Settlement applies it and appends exactly one `Match`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ledger::{AssetId, CryptoPair, PairId, UserId};
use super::order::{Order, OrderId, OrderSide};

/// Caller-supplied identifier of a trade decision. Settlement is
/// idempotent on it.
pub type TradeId = Uuid;

/// A decided trade between a taker and a maker order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub trade_id: TradeId,
    pub pair_id: PairId,
    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Side of the taker.
    pub side: OrderSide,
    pub trade_time: DateTime<Utc>,
}

impl TradeDecision {
    /// Reject decisions that can never be settled, before any lookup.
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= Decimal::ZERO {
            return Err(format!("quantity must be positive, got {}", self.quantity));
        }
        if self.price <= Decimal::ZERO {
            return Err(format!("price must be positive, got {}", self.price));
        }
        if self.taker_order_id == self.maker_order_id {
            return Err(format!(
                "taker and maker are the same order {}",
                self.taker_order_id
            ));
        }
        Ok(())
    }

    /// Wallet credits delivered by this trade, taker first.
    ///
    /// The funding side was already debited at admission, so settlement
    /// only hands over the counter-asset. Each leg is credited by the
    /// trade quantity.
    pub fn credits(&self, pair: &CryptoPair, taker: &Order, maker: &Order) -> [Credit; 2] {
        let (taker_asset, maker_asset) = match self.side {
            OrderSide::Buy => (pair.primary_asset, pair.secondary_asset),
            OrderSide::Sell => (pair.secondary_asset, pair.primary_asset),
        };
        [
            Credit {
                user_id: taker.user_id,
                asset_id: taker_asset,
                amount: self.quantity,
            },
            Credit {
                user_id: maker.user_id,
                asset_id: maker_asset,
                amount: self.quantity,
            },
        ]
    }

    /// Build the match record for this decision.
    pub fn to_match(&self) -> Match {
        Match {
            id: Uuid::new_v4(),
            trade_id: self.trade_id,
            pair_id: self.pair_id,
            taker_order_id: self.taker_order_id,
            maker_order_id: self.maker_order_id,
            quantity: self.quantity,
            price: self.price,
            transaction_time: self.trade_time,
        }
    }
}

/// A single positive wallet movement produced by settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credit {
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub amount: Decimal,
}

/// Append-only record of a settled trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub trade_id: TradeId,
    pub pair_id: PairId,
    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub quantity: Decimal,
    pub price: Decimal,
    pub transaction_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderDraft, OrderType};
    use rust_decimal_macros::dec;

    fn pair() -> CryptoPair {
        CryptoPair {
            id: 3,
            code: "ETH-USDT".to_string(),
            primary_asset: 1,
            secondary_asset: 2,
        }
    }

    fn order(id: OrderId, user_id: UserId, side: OrderSide) -> Order {
        OrderDraft {
            user_id,
            pair_id: 3,
            quantity: dec!(10),
            price: dec!(5),
            side,
            order_type: OrderType::Limit,
            created_at: Utc::now(),
        }
        .into_order(id)
    }

    fn decision(side: OrderSide) -> TradeDecision {
        TradeDecision {
            trade_id: Uuid::new_v4(),
            pair_id: 3,
            taker_order_id: 1,
            maker_order_id: 2,
            quantity: dec!(4),
            price: dec!(5),
            side,
            trade_time: Utc::now(),
        }
    }

    #[test]
    fn test_buy_credits_primary_to_taker() {
        let d = decision(OrderSide::Buy);
        let [taker, maker] = d.credits(
            &pair(),
            &order(1, 100, OrderSide::Buy),
            &order(2, 200, OrderSide::Sell),
        );
        assert_eq!((taker.user_id, taker.asset_id, taker.amount), (100, 1, dec!(4)));
        assert_eq!((maker.user_id, maker.asset_id, maker.amount), (200, 2, dec!(4)));
    }

    #[test]
    fn test_sell_credits_secondary_to_taker() {
        let d = decision(OrderSide::Sell);
        let [taker, maker] = d.credits(
            &pair(),
            &order(1, 100, OrderSide::Sell),
            &order(2, 200, OrderSide::Buy),
        );
        assert_eq!((taker.user_id, taker.asset_id), (100, 2));
        assert_eq!((maker.user_id, maker.asset_id), (200, 1));
    }

    #[test]
    fn test_validate_rejects_self_match() {
        let mut d = decision(OrderSide::Buy);
        d.maker_order_id = d.taker_order_id;
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_match_carries_trade_id() {
        let d = decision(OrderSide::Buy);
        let m = d.to_match();
        assert_eq!(m.trade_id, d.trade_id);
        assert_eq!(m.quantity, d.quantity);
        assert_eq!(m.transaction_time, d.trade_time);
    }
}
