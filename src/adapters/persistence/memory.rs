//! In-memory transactional store, optionally backed by a journal and a
//! JSON snapshot.
//!
//! Transactions are serialised: `begin` takes the ledger lock, reads go
//! through the transaction's `ChangeSet` and then the locked state, and
//! writes only touch the change set. `commit` applies the change set to
//! the state. A transaction dropped before commit leaves the shared state
//! untouched.
//!
//! In durable mode each commit appends its change set to the journal
//! before it is applied, so a failed write fails the commit. Once
//! `compact_after` entries accumulate, the snapshot is rewritten and the
//! journal truncated. Opening a durable store replays the journal on top
//! of the snapshot and compacts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::journal::JournalFile;
use super::snapshot::SnapshotFile;
use crate::domain::{
    AssetId, CryptoPair, Match, Order, OrderDraft, OrderId, PairId, TradeId, User, UserId,
    Wallet,
};
use crate::ports::{EventId, OutboxEvent, OutboxRecord, Store, StoreTx, UserDirectory};

/// Complete ledger contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    users: BTreeMap<UserId, User>,
    pairs: BTreeMap<PairId, CryptoPair>,
    /// user → asset → balance
    wallets: BTreeMap<UserId, BTreeMap<AssetId, Decimal>>,
    orders: BTreeMap<OrderId, Order>,
    matches: Vec<Match>,
    settled_trades: BTreeSet<TradeId>,
    outbox: BTreeMap<EventId, OutboxRecord>,
    next_order_id: OrderId,
    next_event_id: EventId,
}

impl LedgerState {
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    fn balance(&self, user_id: UserId, asset_id: AssetId) -> Option<Decimal> {
        self.wallets
            .get(&user_id)
            .and_then(|assets| assets.get(&asset_id))
            .copied()
    }

    /// Fold a change set into the state.
    ///
    /// Every field carries the value after the change, so applying an
    /// entry the state already contains leaves it as is.
    fn apply(&mut self, changes: ChangeSet) {
        for user in changes.users {
            self.users.insert(user.id, user);
        }
        for pair in changes.pairs {
            self.pairs.insert(pair.id, pair);
        }
        for (user_id, assets) in changes.wallets {
            self.wallets.entry(user_id).or_default().extend(assets);
        }
        self.orders.extend(changes.orders);
        for record in changes.matches {
            if self.settled_trades.insert(record.trade_id) {
                self.matches.push(record);
            }
        }
        self.outbox.extend(changes.events);
        for id in changes.delivered {
            self.outbox.remove(&id);
        }
        if let Some(id) = changes.next_order_id {
            self.next_order_id = id;
        }
        if let Some(id) = changes.next_event_id {
            self.next_event_id = id;
        }
    }
}

/// Net effect of one transaction or store write.
///
/// Held as the transaction's write set, applied to the ledger on commit
/// and appended to the journal as one line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    users: Vec<User>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pairs: Vec<CryptoPair>,
    /// user → asset → balance after the change
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    wallets: BTreeMap<UserId, BTreeMap<AssetId, Decimal>>,
    /// Inserted or updated orders.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    orders: BTreeMap<OrderId, Order>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    matches: Vec<Match>,
    /// Enqueued or updated outbox records.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    events: BTreeMap<EventId, OutboxRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    delivered: Vec<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_order_id: Option<OrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_event_id: Option<EventId>,
}

impl ChangeSet {
    fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.pairs.is_empty()
            && self.wallets.is_empty()
            && self.orders.is_empty()
            && self.matches.is_empty()
            && self.events.is_empty()
            && self.delivered.is_empty()
            && self.next_order_id.is_none()
            && self.next_event_id.is_none()
    }

    fn balance(&self, user_id: UserId, asset_id: AssetId) -> Option<Decimal> {
        self.wallets
            .get(&user_id)
            .and_then(|assets| assets.get(&asset_id))
            .copied()
    }

    fn set_balance(&mut self, user_id: UserId, asset_id: AssetId, balance: Decimal) {
        self.wallets
            .entry(user_id)
            .or_default()
            .insert(asset_id, balance);
    }
}

/// On-disk side of a durable store.
#[derive(Debug)]
struct Durability {
    snapshot: SnapshotFile,
    journal: JournalFile,
    compact_after: u64,
}

impl Durability {
    /// Rewrite the snapshot from `state`, then drop the journal entries it
    /// now covers.
    async fn compact(&self, state: &LedgerState) -> Result<()> {
        self.snapshot
            .save(state)
            .await
            .context("Failed to write ledger snapshot")?;
        self.journal.truncate().await?;
        debug!("Ledger journal compacted");
        Ok(())
    }
}

/// Apply `changes` to the locked state, journaling them first in durable
/// mode.
async fn apply_changes(
    state: &mut LedgerState,
    changes: ChangeSet,
    durability: Option<&Durability>,
) -> Result<()> {
    if changes.is_empty() {
        return Ok(());
    }

    let Some(durability) = durability else {
        state.apply(changes);
        return Ok(());
    };

    durability
        .journal
        .append(&changes)
        .await
        .context("Failed to append ledger journal")?;
    state.apply(changes);

    // The commit is already durable; a failed compaction is retried on
    // the next commit.
    if durability.journal.entries() >= durability.compact_after {
        if let Err(e) = durability.compact(state).await {
            warn!(error = %e, "Ledger compaction failed");
        }
    }
    Ok(())
}

/// Transactional ledger store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<LedgerState>>,
    durability: Option<Arc<Durability>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, volatile store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            durability: None,
        }
    }

    /// Open a durable store in `data_dir`.
    ///
    /// Restores the last snapshot, replays the journal on top of it and
    /// compacts. Afterwards the snapshot is rewritten every
    /// `compact_after` commits.
    pub async fn durable(data_dir: impl AsRef<Path>, compact_after: u64) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let snapshot = SnapshotFile::open(data_dir).await?;
        let journal = JournalFile::open(data_dir).await?;

        let mut state = snapshot.load().await?.unwrap_or_default();
        let entries = journal.load().await?;
        let replayed = entries.len();
        for changes in entries {
            state.apply(changes);
        }

        let durability = Durability {
            snapshot,
            journal,
            compact_after: compact_after.max(1),
        };
        durability.compact(&state).await?;

        info!(
            path = %data_dir.display(),
            replayed,
            orders = state.order_count(),
            "Durable ledger opened"
        );

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            durability: Some(Arc::new(durability)),
        })
    }

    /// Rewrite the snapshot and truncate the journal. No-op for a
    /// volatile store.
    pub async fn compact(&self) -> Result<()> {
        let Some(durability) = &self.durability else {
            return Ok(());
        };
        let state = self.state.lock().await;
        durability.compact(&*state).await
    }

    /// Whether the store holds no reference data yet.
    pub async fn is_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.users.is_empty() && state.pairs.is_empty()
    }

    /// Register (or replace) a user.
    pub async fn seed_user(&self, user: User) -> Result<()> {
        self.mutate(|_| {
            Ok(ChangeSet {
                users: vec![user],
                ..ChangeSet::default()
            })
        })
        .await
    }

    /// Register (or replace) a trading pair. Codes must stay unique.
    pub async fn seed_pair(&self, pair: CryptoPair) -> Result<()> {
        self.mutate(|state| {
            ensure!(
                !state
                    .pairs
                    .values()
                    .any(|p| p.code == pair.code && p.id != pair.id),
                "pair code {} already registered",
                pair.code
            );
            Ok(ChangeSet {
                pairs: vec![pair],
                ..ChangeSet::default()
            })
        })
        .await
    }

    /// Open a wallet with an initial balance, replacing any previous one.
    pub async fn seed_wallet(&self, user_id: UserId, asset_id: AssetId, balance: Decimal) -> Result<()> {
        self.mutate(|_| {
            ensure!(
                balance >= Decimal::ZERO,
                "wallet balance must not be negative, got {balance}"
            );
            let mut changes = ChangeSet::default();
            changes.set_balance(user_id, asset_id, balance);
            Ok(changes)
        })
        .await
    }

    /// Current committed balance, `None` if the wallet does not exist.
    pub async fn balance(&self, user_id: UserId, asset_id: AssetId) -> Option<Decimal> {
        self.state.lock().await.balance(user_id, asset_id)
    }

    /// Every committed wallet.
    pub async fn wallets(&self) -> Vec<Wallet> {
        let state = self.state.lock().await;
        state
            .wallets
            .iter()
            .flat_map(|(&user_id, assets)| {
                assets.iter().map(move |(&asset_id, &balance)| Wallet {
                    user_id,
                    asset_id,
                    balance,
                })
            })
            .collect()
    }

    /// Committed order by id.
    pub async fn order(&self, id: OrderId) -> Option<Order> {
        self.state.lock().await.orders.get(&id).cloned()
    }

    /// Every committed order.
    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    /// Committed match records in settlement order.
    pub async fn matches(&self) -> Vec<Match> {
        self.state.lock().await.matches.clone()
    }

    /// Derive a change set from the locked state and apply it.
    async fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&LedgerState) -> Result<ChangeSet>,
    {
        let mut state = self.state.lock().await;
        let changes = f(&*state)?;
        apply_changes(&mut *state, changes, self.durability.as_deref()).await
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        Ok(Box::new(MemoryTx {
            guard,
            changes: ChangeSet::default(),
            durability: self.durability.clone(),
        }))
    }

    async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let state = self.state.lock().await;
        Ok(state.outbox.values().take(limit).cloned().collect())
    }

    async fn mark_delivered(&self, id: EventId) -> Result<()> {
        self.mutate(|state| {
            let mut changes = ChangeSet::default();
            if state.outbox.contains_key(&id) {
                changes.delivered.push(id);
            } else {
                warn!(event_id = id, "Delivered event was not pending");
            }
            Ok(changes)
        })
        .await
    }

    async fn record_delivery_failure(&self, id: EventId, error: &str) -> Result<()> {
        self.mutate(|state| {
            let mut record = state
                .outbox
                .get(&id)
                .cloned()
                .with_context(|| format!("outbox event {id} not pending"))?;
            record.attempts += 1;
            record.last_error = Some(error.to_string());

            let mut changes = ChangeSet::default();
            changes.events.insert(id, record);
            Ok(changes)
        })
        .await
    }

    async fn is_healthy(&self) -> bool {
        match &self.durability {
            Some(durability) => {
                durability.snapshot.is_healthy().await && durability.journal.is_healthy().await
            }
            None => true,
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }
}

/// Open transaction on a `MemoryStore`. Holds the ledger lock until it is
/// committed or dropped; the locked state is only written on commit.
struct MemoryTx {
    guard: OwnedMutexGuard<LedgerState>,
    changes: ChangeSet,
    durability: Option<Arc<Durability>>,
}

impl MemoryTx {
    fn balance(&self, user_id: UserId, asset_id: AssetId) -> Option<Decimal> {
        self.changes
            .balance(user_id, asset_id)
            .or_else(|| self.guard.balance(user_id, asset_id))
    }

    fn has_order(&self, id: OrderId) -> bool {
        self.changes.orders.contains_key(&id) || self.guard.orders.contains_key(&id)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn pair_by_code(&mut self, code: &str) -> Result<Option<CryptoPair>> {
        Ok(self.guard.pairs.values().find(|p| p.code == code).cloned())
    }

    async fn pair_by_id(&mut self, id: PairId) -> Result<Option<CryptoPair>> {
        Ok(self.guard.pairs.get(&id).cloned())
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self
            .changes
            .orders
            .get(&id)
            .or_else(|| self.guard.orders.get(&id))
            .cloned())
    }

    async fn wallet(&mut self, user_id: UserId, asset_id: AssetId) -> Result<Option<Wallet>> {
        Ok(self.balance(user_id, asset_id).map(|balance| Wallet {
            user_id,
            asset_id,
            balance,
        }))
    }

    async fn adjust_wallet(&mut self, user_id: UserId, asset_id: AssetId, delta: Decimal) -> Result<Decimal> {
        let next = match self.balance(user_id, asset_id) {
            Some(balance) => balance.checked_add(delta).with_context(|| {
                format!(
                    "adjusting wallet for user {user_id}, asset {asset_id} by {delta} overflows"
                )
            })?,
            None if delta >= Decimal::ZERO => delta,
            None => bail!("wallet for user {user_id}, asset {asset_id} does not exist"),
        };
        ensure!(
            next >= Decimal::ZERO,
            "adjusting wallet for user {user_id}, asset {asset_id} by {delta} would leave {next}"
        );

        self.changes.set_balance(user_id, asset_id, next);
        Ok(next)
    }

    async fn insert_order(&mut self, draft: OrderDraft) -> Result<Order> {
        let id = self.changes.next_order_id.unwrap_or(self.guard.next_order_id) + 1;
        self.changes.next_order_id = Some(id);
        let order = draft.into_order(id);
        self.changes.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        ensure!(
            order.is_consistent(),
            "order {} has filled {} of {} with status {:?}",
            order.id,
            order.filled_quantity,
            order.quantity,
            order.status
        );
        ensure!(self.has_order(order.id), "order {} does not exist", order.id);
        self.changes.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn is_trade_settled(&mut self, trade_id: TradeId) -> Result<bool> {
        Ok(self.guard.settled_trades.contains(&trade_id)
            || self.changes.matches.iter().any(|m| m.trade_id == trade_id))
    }

    async fn save_match(&mut self, record: &Match) -> Result<()> {
        ensure!(
            !self.is_trade_settled(record.trade_id).await?,
            "trade {} already settled",
            record.trade_id
        );
        self.changes.matches.push(record.clone());
        Ok(())
    }

    async fn enqueue_event(&mut self, event: OutboxEvent) -> Result<EventId> {
        let id = self.changes.next_event_id.unwrap_or(self.guard.next_event_id) + 1;
        self.changes.next_event_id = Some(id);
        self.changes.events.insert(
            id,
            OutboxRecord {
                id,
                event,
                attempts: 0,
                last_error: None,
                enqueued_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx {
            mut guard,
            changes,
            durability,
        } = *self;

        apply_changes(&mut *guard, changes, durability.as_deref())
            .await
            .context("Failed to commit ledger transaction")
    }
}

/// Load reference data into an empty store. A store that already holds
/// users or pairs is left as is.
pub async fn bootstrap(
    store: &MemoryStore,
    users: &[User],
    pairs: &[CryptoPair],
    wallets: &[Wallet],
) -> Result<bool> {
    if !store.is_empty().await {
        info!("Ledger already populated, skipping seed data");
        return Ok(false);
    }

    for user in users {
        store.seed_user(user.clone()).await?;
    }
    for pair in pairs {
        store.seed_pair(pair.clone()).await?;
    }
    for wallet in wallets {
        store
            .seed_wallet(wallet.user_id, wallet.asset_id, wallet.balance)
            .await?;
    }

    info!(
        users = users.len(),
        pairs = pairs.len(),
        wallets = wallets.len(),
        "Ledger seeded"
    );
    Ok(true)
}
