//! Settlement Benchmarks — Hot-Path Performance Validation
//!
//! Benchmarks order admission and trade settlement against the
//! in-memory ledger. Both run once per inbound request.
//!
//! Run with: cargo bench --bench settlement_bench

use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use order_settlement::adapters::persistence::MemoryStore;
use order_settlement::config::{IntakeConfig, SettlementConfig};
use order_settlement::domain::{CryptoPair, OrderRequest, OrderSide, OrderType, TradeDecision, User};
use order_settlement::ports::Identity;
use order_settlement::usecases::{MatchSettlement, OrderIntake};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

async fn seeded() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .seed_user(User {
            id: 1,
            email: "bench@example.com".to_string(),
            active: true,
        })
        .await
        .expect("seed user");
    store
        .seed_pair(CryptoPair {
            id: 1,
            code: "BTC-USDT".to_string(),
            primary_asset: 1,
            secondary_asset: 2,
        })
        .await
        .expect("seed pair");
    // Large enough that no iteration runs out of funds.
    store
        .seed_wallet(1, 1, Decimal::MAX / dec!(4))
        .await
        .expect("seed wallet");
    store
        .seed_wallet(1, 2, Decimal::MAX / dec!(4))
        .await
        .expect("seed wallet");
    store
}

fn request(side: OrderSide) -> OrderRequest {
    OrderRequest {
        pair_code: "BTC-USDT".to_string(),
        side,
        order_type: OrderType::Limit,
        quantity: dec!(0.5),
        price: dec!(42000),
    }
}

/// Benchmark a single order admission (check + debit + insert + outbox).
fn bench_process_order(c: &mut Criterion) {
    let rt = runtime();
    let store = rt.block_on(seeded());
    let intake = OrderIntake::new(Arc::clone(&store), Arc::clone(&store), &IntakeConfig::default());
    let identity = Identity::new("bench@example.com", "trader");
    let buy = request(OrderSide::Buy);

    c.bench_function("process_order_buy", |b| {
        b.to_async(&rt).iter(|| async {
            let order = intake
                .process_order(black_box(&identity), black_box(&buy))
                .await
                .expect("admission");
            black_box(order);
        });
    });
}

/// Benchmark admission of both sides followed by their settlement.
fn bench_admit_and_settle(c: &mut Criterion) {
    let rt = runtime();
    let store = rt.block_on(seeded());
    let intake = OrderIntake::new(Arc::clone(&store), Arc::clone(&store), &IntakeConfig::default());
    let settlement = MatchSettlement::new(Arc::clone(&store), &SettlementConfig::default());
    let identity = Identity::new("bench@example.com", "trader");
    let buy = request(OrderSide::Buy);
    let sell = request(OrderSide::Sell);

    c.bench_function("admit_and_settle_match", |b| {
        b.to_async(&rt).iter(|| async {
            let taker = intake.process_order(&identity, &buy).await.expect("taker");
            let maker = intake.process_order(&identity, &sell).await.expect("maker");
            let decision = TradeDecision {
                trade_id: Uuid::new_v4(),
                pair_id: 1,
                taker_order_id: taker.id,
                maker_order_id: maker.id,
                quantity: taker.quantity,
                price: maker.price,
                side: OrderSide::Buy,
                trade_time: Utc::now(),
            };
            let outcome = settlement
                .settle_match(black_box(&decision))
                .await
                .expect("settlement");
            black_box(outcome);
        });
    });
}

criterion_group!(benches, bench_process_order, bench_admit_and_settle);
criterion_main!(benches);
