//! Order domain types.
//!
//! An order is admitted in `Progress`, filled by settlement, and never
//! deleted. Its status is always derived from `filled_quantity` against
//! `quantity`, so the two can never disagree.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ledger::{AssetId, CryptoPair, PairId, UserId};

/// Store-assigned order identifier.
pub type OrderId = u64;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type as submitted by the client. Carried through untouched;
/// admission and settlement treat every type the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Fill state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Nothing filled yet.
    Progress,
    /// Some but not all of the quantity filled.
    Partial,
    /// Fully filled.
    Complete,
}

impl OrderStatus {
    /// Derive the status from a fill level.
    ///
    /// Callers must already guarantee `0 <= filled <= quantity`.
    pub fn from_fill(filled: Decimal, quantity: Decimal) -> Self {
        if filled.is_zero() {
            Self::Progress
        } else if filled >= quantity {
            Self::Complete
        } else {
            Self::Partial
        }
    }
}

/// Error raised when a fill would break the `filled <= quantity` bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fill of {fill} on order {order_id} exceeds remaining {remaining}")]
pub struct FillError {
    pub order_id: OrderId,
    pub fill: Decimal,
    pub remaining: Decimal,
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub pair_id: PairId,
    pub quantity: Decimal,
    pub price: Decimal,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Quantity still open for matching.
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Apply a fill and recompute the status.
    ///
    /// The order is left untouched when the fill is not positive or
    /// would overshoot the order quantity.
    pub fn apply_fill(&mut self, fill: Decimal) -> Result<(), FillError> {
        if fill <= Decimal::ZERO || fill > self.remaining() {
            return Err(FillError {
                order_id: self.id,
                fill,
                remaining: self.remaining(),
            });
        }

        self.filled_quantity += fill;
        self.status = OrderStatus::Partial;
        if self.filled_quantity == self.quantity {
            self.status = OrderStatus::Complete;
        }
        Ok(())
    }

    /// Check the fill invariant: `0 <= filled <= quantity` and the status
    /// matches the fill level.
    pub fn is_consistent(&self) -> bool {
        self.filled_quantity >= Decimal::ZERO
            && self.filled_quantity <= self.quantity
            && self.status == OrderStatus::from_fill(self.filled_quantity, self.quantity)
    }
}

/// An order that passed admission and is about to be inserted.
/// The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub user_id: UserId,
    pub pair_id: PairId,
    pub quantity: Decimal,
    pub price: Decimal,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub created_at: DateTime<Utc>,
}

impl OrderDraft {
    /// Materialize the draft under a store-assigned id, in `Progress`
    /// with nothing filled.
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            user_id: self.user_id,
            pair_id: self.pair_id,
            quantity: self.quantity,
            price: self.price,
            side: self.side,
            order_type: self.order_type,
            status: OrderStatus::Progress,
            filled_quantity: Decimal::ZERO,
            created_at: self.created_at,
        }
    }
}

/// Incoming order request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub pair_code: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Decimal,
}

impl OrderRequest {
    /// Reject requests that can never be admitted, before any lookup.
    pub fn validate(&self) -> Result<(), String> {
        if self.pair_code.trim().is_empty() {
            return Err("pair code must not be empty".to_string());
        }
        if self.quantity <= Decimal::ZERO {
            return Err(format!("quantity must be positive, got {}", self.quantity));
        }
        if self.price <= Decimal::ZERO {
            return Err(format!("price must be positive, got {}", self.price));
        }
        if self.cost().is_none() {
            return Err(format!(
                "cost of {} at {} exceeds the representable range",
                self.quantity, self.price
            ));
        }
        Ok(())
    }

    /// Amount of the funding asset reserved by this order:
    /// `quantity * price` for a buy, `quantity` for a sell.
    ///
    /// `None` when the product does not fit in a `Decimal`.
    pub fn cost(&self) -> Option<Decimal> {
        match self.side {
            OrderSide::Buy => self.quantity.checked_mul(self.price),
            OrderSide::Sell => Some(self.quantity),
        }
    }

    /// Wallet debit that admits this order on `pair`.
    pub fn reservation(&self, pair: &CryptoPair) -> Result<Reservation, String> {
        let amount = self.cost().ok_or_else(|| {
            format!(
                "cost of {} at {} exceeds the representable range",
                self.quantity, self.price
            )
        })?;
        Ok(Reservation {
            asset_id: pair.funding_asset(self.side),
            amount,
        })
    }

    /// Build the draft to persist once funds are reserved.
    pub fn to_draft(&self, user_id: UserId, pair_id: PairId, now: DateTime<Utc>) -> OrderDraft {
        OrderDraft {
            user_id,
            pair_id,
            quantity: self.quantity,
            price: self.price,
            side: self.side,
            order_type: self.order_type,
            created_at: now,
        }
    }
}

/// A reservation taken from one wallet at admission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub asset_id: AssetId,
    pub amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(quantity: Decimal) -> Order {
        OrderDraft {
            user_id: 1,
            pair_id: 1,
            quantity,
            price: dec!(5),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            created_at: Utc::now(),
        }
        .into_order(7)
    }

    #[test]
    fn test_new_order_in_progress() {
        let o = order(dec!(10));
        assert_eq!(o.status, OrderStatus::Progress);
        assert_eq!(o.filled_quantity, Decimal::ZERO);
        assert!(o.is_consistent());
    }

    #[test]
    fn test_partial_then_complete() {
        let mut o = order(dec!(20));
        o.apply_fill(dec!(10)).unwrap();
        assert_eq!(o.status, OrderStatus::Partial);
        o.apply_fill(dec!(10)).unwrap();
        assert_eq!(o.status, OrderStatus::Complete);
        assert!(o.is_consistent());
    }

    #[test]
    fn test_full_fill_in_one_trade() {
        let mut o = order(dec!(10));
        o.apply_fill(dec!(10)).unwrap();
        assert_eq!(o.status, OrderStatus::Complete);
    }

    #[test]
    fn test_overfill_rejected_and_untouched() {
        let mut o = order(dec!(10));
        o.apply_fill(dec!(4)).unwrap();
        let err = o.apply_fill(dec!(7)).unwrap_err();
        assert_eq!(err.remaining, dec!(6));
        assert_eq!(o.filled_quantity, dec!(4));
        assert_eq!(o.status, OrderStatus::Partial);
    }

    #[test]
    fn test_zero_fill_rejected() {
        let mut o = order(dec!(10));
        assert!(o.apply_fill(Decimal::ZERO).is_err());
    }

    #[test]
    fn test_request_cost_by_side() {
        let mut req = OrderRequest {
            pair_code: "BTC-USDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: dec!(10),
            price: dec!(5),
        };
        assert_eq!(req.cost(), Some(dec!(50)));
        req.side = OrderSide::Sell;
        assert_eq!(req.cost(), Some(dec!(10)));
    }

    #[test]
    fn test_buy_cost_overflow_is_rejected() {
        let req = OrderRequest {
            pair_code: "BTC-USDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: Decimal::MAX,
            price: dec!(2),
        };
        let pair = CryptoPair {
            id: 1,
            code: "BTC-USDT".to_string(),
            primary_asset: 1,
            secondary_asset: 2,
        };
        assert_eq!(req.cost(), None);
        assert!(req.reservation(&pair).is_err());
        assert!(req.validate().is_err());

        // The same quantity on the sell side reserves the quantity itself.
        let sell = OrderRequest {
            side: OrderSide::Sell,
            ..req
        };
        assert_eq!(sell.cost(), Some(Decimal::MAX));
        assert!(sell.validate().is_ok());
    }

    #[test]
    fn test_request_validation() {
        let req = OrderRequest {
            pair_code: " ".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: dec!(1),
            price: dec!(1),
        };
        assert!(req.validate().is_err());

        let req = OrderRequest {
            pair_code: "BTC-USDT".to_string(),
            quantity: dec!(-1),
            ..req
        };
        assert!(req.validate().is_err());
    }
}
