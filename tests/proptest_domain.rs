//! Property-Based Tests — Ledger and Order Invariants
//!
//! Uses `proptest` to verify that orders and wallets keep their
//! invariants across random fills and random order streams.

use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use order_settlement::adapters::persistence::MemoryStore;
use order_settlement::config::{IntakeConfig, SettlementConfig};
use order_settlement::domain::{
    CryptoPair, ExchangeError, Order, OrderRequest, OrderSide, OrderStatus, OrderType,
    TradeDecision, User,
};
use order_settlement::ports::Identity;
use order_settlement::usecases::{MatchSettlement, OrderIntake};

/// Positive amount with two decimal places, 0.01 to 100.00.
fn amount() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn side() -> impl Strategy<Value = OrderSide> {
    prop_oneof![Just(OrderSide::Buy), Just(OrderSide::Sell)]
}

fn fresh_order(quantity: Decimal) -> Order {
    Order {
        id: 1,
        user_id: 1,
        pair_id: 1,
        quantity,
        price: Decimal::ONE,
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        status: OrderStatus::Progress,
        filled_quantity: Decimal::ZERO,
        created_at: Utc::now(),
    }
}

async fn seeded(balance: Decimal) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .seed_user(User {
            id: 1,
            email: "trader@example.com".to_string(),
            active: true,
        })
        .await
        .unwrap();
    store
        .seed_pair(CryptoPair {
            id: 1,
            code: "ETH-USDT".to_string(),
            primary_asset: 1,
            secondary_asset: 2,
        })
        .await
        .unwrap();
    store.seed_wallet(1, 1, balance).await.unwrap();
    store.seed_wallet(1, 2, balance).await.unwrap();
    store
}

// ── Order Fill Properties ───────────────────────────────────

proptest! {
    /// Filled quantity stays within [0, quantity] and status always
    /// matches the fill, whatever fills are attempted.
    #[test]
    fn fills_never_break_order_invariant(
        quantity in amount(),
        fills in prop::collection::vec(amount(), 1..20),
    ) {
        let mut order = fresh_order(quantity);

        for fill in fills {
            let before = order.clone();
            match order.apply_fill(fill) {
                Ok(()) => prop_assert_eq!(order.filled_quantity, before.filled_quantity + fill),
                Err(_) => prop_assert_eq!(&order, &before),
            }
            prop_assert!(order.filled_quantity >= Decimal::ZERO);
            prop_assert!(order.filled_quantity <= order.quantity);
            prop_assert_eq!(
                order.status,
                OrderStatus::from_fill(order.filled_quantity, order.quantity)
            );
            prop_assert!(order.is_consistent());
        }
    }

    /// Status moves only forward: Progress → Partial → Complete.
    #[test]
    fn status_never_regresses(
        quantity in amount(),
        fills in prop::collection::vec(amount(), 1..20),
    ) {
        let rank = |s: OrderStatus| match s {
            OrderStatus::Progress => 0,
            OrderStatus::Partial => 1,
            OrderStatus::Complete => 2,
        };
        let mut order = fresh_order(quantity);
        let mut last = rank(order.status);

        for fill in fills {
            let _ = order.apply_fill(fill);
            let now = rank(order.status);
            prop_assert!(now >= last, "status went from {last} to {now}");
            last = now;
        }
    }
}

// ── Ledger Properties ───────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random order streams never drive a wallet negative, and every
    /// admitted order is paid for exactly once.
    #[test]
    fn intake_keeps_wallets_non_negative(
        initial in amount(),
        orders in prop::collection::vec((side(), amount(), amount()), 1..25),
    ) {
        tokio_test::block_on(async {
            let store = seeded(initial).await;
            let intake = OrderIntake::new(
                Arc::clone(&store),
                Arc::clone(&store),
                &IntakeConfig::default(),
            );
            let identity = Identity::new("trader@example.com", "trader");

            let mut spent_primary = Decimal::ZERO;
            let mut spent_secondary = Decimal::ZERO;

            for (side, quantity, price) in orders {
                let request = OrderRequest {
                    pair_code: "ETH-USDT".to_string(),
                    side,
                    order_type: OrderType::Limit,
                    quantity,
                    price,
                };
                match intake.process_order(&identity, &request).await {
                    Ok(_) => match side {
                        OrderSide::Buy => spent_secondary += quantity * price,
                        OrderSide::Sell => spent_primary += quantity,
                    },
                    Err(ExchangeError::InsufficientBalance { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }

                for wallet in store.wallets().await {
                    assert!(wallet.balance >= Decimal::ZERO, "negative wallet {wallet:?}");
                }
            }

            assert_eq!(store.balance(1, 1).await, Some(initial - spent_primary));
            assert_eq!(store.balance(1, 2).await, Some(initial - spent_secondary));
        });
    }

    /// Settling random quantities against a resting pair of orders keeps
    /// both orders consistent and only applies fills that fit.
    #[test]
    fn settlement_keeps_orders_consistent(
        taker_quantity in amount(),
        maker_quantity in amount(),
        trades in prop::collection::vec(amount(), 1..10),
    ) {
        tokio_test::block_on(async {
            let store = seeded(Decimal::new(1_000_000, 0)).await;
            let intake = OrderIntake::new(
                Arc::clone(&store),
                Arc::clone(&store),
                &IntakeConfig::default(),
            );
            let settlement =
                MatchSettlement::new(Arc::clone(&store), &SettlementConfig::default());
            let identity = Identity::new("trader@example.com", "trader");

            let place = |side: OrderSide, quantity: Decimal| OrderRequest {
                pair_code: "ETH-USDT".to_string(),
                side,
                order_type: OrderType::Limit,
                quantity,
                price: Decimal::ONE,
            };
            let taker = intake
                .process_order(&identity, &place(OrderSide::Buy, taker_quantity))
                .await
                .unwrap();
            let maker = intake
                .process_order(&identity, &place(OrderSide::Sell, maker_quantity))
                .await
                .unwrap();

            let mut settled = 0;
            for quantity in trades {
                let decision = TradeDecision {
                    trade_id: Uuid::new_v4(),
                    pair_id: 1,
                    taker_order_id: taker.id,
                    maker_order_id: maker.id,
                    quantity,
                    price: Decimal::ONE,
                    side: OrderSide::Buy,
                    trade_time: Utc::now(),
                };
                match settlement.settle_match(&decision).await {
                    Ok(_) => settled += 1,
                    Err(ExchangeError::Overfill(_)) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }

            let taker = store.order(taker.id).await.unwrap();
            let maker = store.order(maker.id).await.unwrap();
            assert!(taker.is_consistent());
            assert!(maker.is_consistent());
            assert_eq!(taker.filled_quantity, maker.filled_quantity);
            assert_eq!(store.matches().await.len(), settled);
        });
    }
}
