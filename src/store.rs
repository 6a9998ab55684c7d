//! In-memory ACID store.
//!
//! Every table lives in one [`LedgerState`] behind a single mutex. A
//! transaction writes the live tables in place; each table journals the prior
//! value of every row it hands out for writing. A body that returns `Ok` inside
//! the runtime budget clears the journals, anything else replays them
//! backwards, so a wallet change is never visible without the wager or
//! settlement write that goes with it. A transaction costs the rows it touches,
//! not the size of the history.

use crate::config::TransactionLimits;
use crate::engine::LedgerError;
use crate::exposure::ExposureLeg;
use crate::hierarchy::{Account, DistributionKey, EntryKey, HierarchyPnlEntry, PnlSummary};
use crate::market::{Market, SettlementId};
use crate::settlement::Settlement;
use crate::types::{EventId, MarketId, UserId, WagerId};
use crate::wager::Wager;
use crate::wallet::Wallet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Instant;
use tracing::warn;

/// Which bound a transaction ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPhase {
    Wait,
    Runtime,
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxPhase::Wait => f.write_str("waiting for the transaction slot"),
            TxPhase::Runtime => f.write_str("running the transaction body"),
        }
    }
}

pub type MarketKey = (EventId, MarketId);

/// A keyed table that can undo its own writes.
///
/// Reads go through `Deref` to the underlying map. Every write path records
/// the row's prior value first.
#[derive(Debug)]
pub struct Table<K, V> {
    rows: BTreeMap<K, V>,
    undo: Vec<(K, Option<V>)>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            undo: Vec::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> Table<K, V> {
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let row = self.rows.get_mut(key)?;
        self.undo.push((key.clone(), Some(row.clone())));
        Some(row)
    }

    pub fn get_or_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        let prior = self.rows.get(&key).cloned();
        self.undo.push((key.clone(), prior));
        self.rows.entry(key).or_default()
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let prior = self.rows.insert(key.clone(), value);
        self.undo.push((key, prior.clone()));
        prior
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let prior = self.rows.remove(key)?;
        self.undo.push((key.clone(), Some(prior.clone())));
        Some(prior)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        let doomed: Vec<K> = self
            .rows
            .iter()
            .filter(|&(k, v)| !keep(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.remove(&key);
        }
    }

    fn touched(&self) -> impl Iterator<Item = &K> {
        self.undo.iter().map(|(key, _)| key)
    }

    fn commit(&mut self) {
        self.undo.clear();
    }

    fn rollback(&mut self) {
        while let Some((key, prior)) = self.undo.pop() {
            match prior {
                Some(row) => {
                    self.rows.insert(key, row);
                }
                None => {
                    self.rows.remove(&key);
                }
            }
        }
    }
}

impl<K, V> Deref for Table<K, V> {
    type Target = BTreeMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}

/// Where a wager is filed in the secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    user: UserId,
    market: SettlementId,
    open: bool,
}

impl Slot {
    fn of(wager: &Wager) -> Self {
        Self {
            user: wager.user_id,
            market: wager.settlement_id.clone(),
            open: wager.is_open(),
        }
    }
}

#[derive(Debug, Default)]
struct WagerIndex {
    by_user: BTreeMap<UserId, BTreeSet<WagerId>>,
    by_market: BTreeMap<SettlementId, BTreeSet<WagerId>>,
    open: BTreeMap<(UserId, SettlementId), BTreeSet<WagerId>>,
}

impl WagerIndex {
    fn add(&mut self, id: WagerId, slot: &Slot) {
        self.by_user.entry(slot.user).or_default().insert(id);
        self.by_market
            .entry(slot.market.clone())
            .or_default()
            .insert(id);
        if slot.open {
            self.open
                .entry((slot.user, slot.market.clone()))
                .or_default()
                .insert(id);
        }
    }

    fn remove(&mut self, id: WagerId, slot: &Slot) {
        detach(&mut self.by_user, &slot.user, id);
        detach(&mut self.by_market, &slot.market, id);
        if slot.open {
            detach(&mut self.open, &(slot.user, slot.market.clone()), id);
        }
    }
}

fn detach<K: Ord>(index: &mut BTreeMap<K, BTreeSet<WagerId>>, key: &K, id: WagerId) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// The wager table plus lookups by user, by market, and open per user-market.
#[derive(Debug, Default)]
pub struct WagerBook {
    rows: Table<WagerId, Wager>,
    index: WagerIndex,
}

impl WagerBook {
    pub fn insert(&mut self, wager: Wager) {
        if let Some(old) = self.rows.get(&wager.id) {
            self.index.remove(wager.id, &Slot::of(old));
        }
        self.index.add(wager.id, &Slot::of(&wager));
        self.rows.insert(wager.id, wager);
    }

    /// Write access. The indexes follow the row when the guard drops.
    pub fn get_mut(&mut self, id: WagerId) -> Option<WagerMut<'_>> {
        let wager = self.rows.get_mut(&id)?;
        Some(WagerMut {
            before: Slot::of(wager),
            wager,
            index: &mut self.index,
        })
    }

    pub fn for_user(&self, user: UserId) -> impl Iterator<Item = &Wager> + '_ {
        self.lookup(self.index.by_user.get(&user))
    }

    pub fn in_market(&self, market: &SettlementId) -> impl Iterator<Item = &Wager> + '_ {
        self.lookup(self.index.by_market.get(market))
    }

    /// One user's open wagers in one market, in placement order.
    pub fn open_in(
        &self,
        user: UserId,
        market: &SettlementId,
    ) -> impl Iterator<Item = &Wager> + '_ {
        self.lookup(self.index.open.get(&(user, market.clone())))
    }

    pub fn open(&self) -> impl Iterator<Item = &Wager> + '_ {
        self.index
            .open
            .values()
            .flatten()
            .filter_map(move |id| self.rows.get(id))
    }

    fn lookup<'a>(
        &'a self,
        ids: Option<&'a BTreeSet<WagerId>>,
    ) -> impl Iterator<Item = &'a Wager> + 'a {
        ids.into_iter()
            .flatten()
            .filter_map(move |id| self.rows.get(id))
    }

    fn commit(&mut self) {
        self.rows.commit();
    }

    fn rollback(&mut self) {
        let touched: BTreeSet<WagerId> = self.rows.touched().copied().collect();
        for id in &touched {
            if let Some(wager) = self.rows.get(id) {
                self.index.remove(*id, &Slot::of(wager));
            }
        }
        self.rows.rollback();
        for id in &touched {
            if let Some(wager) = self.rows.get(id) {
                self.index.add(*id, &Slot::of(wager));
            }
        }
    }
}

impl Deref for WagerBook {
    type Target = BTreeMap<WagerId, Wager>;

    fn deref(&self) -> &Self::Target {
        &self.rows.rows
    }
}

/// Mutable wager that refiles itself in the indexes on drop.
pub struct WagerMut<'a> {
    before: Slot,
    wager: &'a mut Wager,
    index: &'a mut WagerIndex,
}

impl Deref for WagerMut<'_> {
    type Target = Wager;

    fn deref(&self) -> &Wager {
        &*self.wager
    }
}

impl DerefMut for WagerMut<'_> {
    fn deref_mut(&mut self) -> &mut Wager {
        &mut *self.wager
    }
}

impl Drop for WagerMut<'_> {
    fn drop(&mut self) {
        let after = Slot::of(&*self.wager);
        if after != self.before {
            self.index.remove(self.wager.id, &self.before);
            self.index.add(self.wager.id, &after);
        }
    }
}

#[derive(Debug, Default)]
pub struct LedgerState {
    pub accounts: Table<UserId, Account>,
    pub wallets: Table<UserId, Wallet>,
    pub markets: Table<MarketKey, Market>,
    pub wagers: WagerBook,
    /// Full history per key, oldest first. Only the last one can be active.
    pub settlements: Table<SettlementId, Vec<Settlement>>,
    pub summaries: Table<DistributionKey, PnlSummary>,
    pub hierarchy_entries: Table<EntryKey, HierarchyPnlEntry>,
    next_user_id: u64,
    next_wager_id: u64,
    /// Id counters as of the last commit.
    committed_ids: (u64, u64),
}

impl LedgerState {
    pub fn allocate_user_id(&mut self) -> UserId {
        self.next_user_id += 1;
        UserId(self.next_user_id)
    }

    pub fn allocate_wager_id(&mut self) -> WagerId {
        self.next_wager_id += 1;
        WagerId(self.next_wager_id)
    }

    pub fn account(&self, user: UserId) -> Result<&Account, LedgerError> {
        self.accounts.get(&user).ok_or(LedgerError::UserNotFound(user))
    }

    pub fn wallet(&self, user: UserId) -> Result<&Wallet, LedgerError> {
        self.wallets.get(&user).ok_or(LedgerError::UserNotFound(user))
    }

    pub fn wallet_mut(&mut self, user: UserId) -> Result<&mut Wallet, LedgerError> {
        self.wallets.get_mut(&user).ok_or(LedgerError::UserNotFound(user))
    }

    pub fn market(&self, event: &EventId, market: &MarketId) -> Result<&Market, LedgerError> {
        self.markets
            .get(&(event.clone(), market.clone()))
            .ok_or_else(|| LedgerError::MarketNotFound {
                event_id: event.clone(),
                market_id: market.clone(),
            })
    }

    pub fn wager(&self, id: WagerId) -> Result<&Wager, LedgerError> {
        self.wagers.get(&id).ok_or(LedgerError::WagerNotFound(id))
    }

    pub fn wager_mut(&mut self, id: WagerId) -> Result<WagerMut<'_>, LedgerError> {
        self.wagers.get_mut(id).ok_or(LedgerError::WagerNotFound(id))
    }

    pub fn active_settlement(&self, id: &SettlementId) -> Option<&Settlement> {
        self.settlements
            .get(id)
            .and_then(|history| history.last())
            .filter(|s| s.is_active())
    }

    /// One user's open wagers in one market, in placement order.
    pub fn open_wagers<'a>(
        &'a self,
        user: UserId,
        settlement_id: &SettlementId,
    ) -> impl Iterator<Item = &'a Wager> + 'a {
        self.wagers.open_in(user, settlement_id)
    }

    /// Legs of the same user's open wagers in the same market placed before `id`.
    pub fn prefix_legs(&self, wager: &Wager) -> Vec<ExposureLeg> {
        self.open_wagers(wager.user_id, &wager.settlement_id)
            .filter(|w| w.id < wager.id)
            .map(Wager::leg)
            .collect()
    }

    pub fn market_wager_ids(&self, settlement_id: &SettlementId) -> Vec<WagerId> {
        self.wagers.in_market(settlement_id).map(|w| w.id).collect()
    }

    fn commit(&mut self) {
        self.accounts.commit();
        self.wallets.commit();
        self.markets.commit();
        self.wagers.commit();
        self.settlements.commit();
        self.summaries.commit();
        self.hierarchy_entries.commit();
        self.committed_ids = (self.next_user_id, self.next_wager_id);
    }

    /// Undo every uncommitted write. A no-op on a clean state.
    fn rollback(&mut self) {
        self.accounts.rollback();
        self.wallets.rollback();
        self.markets.rollback();
        self.wagers.rollback();
        self.settlements.rollback();
        self.summaries.rollback();
        self.hierarchy_entries.rollback();
        (self.next_user_id, self.next_wager_id) = self.committed_ids;
    }

    #[cfg(test)]
    fn pending_writes(&self) -> usize {
        self.accounts.undo.len()
            + self.wallets.undo.len()
            + self.markets.undo.len()
            + self.wagers.rows.undo.len()
            + self.settlements.undo.len()
            + self.summaries.undo.len()
            + self.hierarchy_entries.undo.len()
    }
}

pub struct MemoryStore {
    state: Mutex<LedgerState>,
    limits: TransactionLimits,
}

impl MemoryStore {
    pub fn new(limits: TransactionLimits) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            limits,
        }
    }

    /// Run `f` atomically. Nothing is committed unless `f` returns `Ok` within budget.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut LedgerState) -> Result<T, LedgerError>,
    {
        let mut guard = self
            .state
            .try_lock_for(self.limits.lock_wait())
            .ok_or(LedgerError::TransactionTimeout {
                phase: TxPhase::Wait,
            })?;
        // a body that panicked last time left its writes behind
        guard.rollback();

        let started = Instant::now();
        let out = match f(&mut *guard) {
            Ok(out) => out,
            Err(err) => {
                guard.rollback();
                return Err(err);
            }
        };

        let elapsed = started.elapsed();
        if elapsed > self.limits.max_runtime() {
            guard.rollback();
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.limits.max_runtime_ms,
                "transaction exceeded runtime budget, discarding"
            );
            return Err(LedgerError::TransactionTimeout {
                phase: TxPhase::Runtime,
            });
        }

        guard.commit();
        Ok(out)
    }

    /// Consistent read under the same wait bound.
    pub fn read<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&LedgerState) -> T,
    {
        let mut guard = self
            .state
            .try_lock_for(self.limits.lock_wait())
            .ok_or(LedgerError::TransactionTimeout {
                phase: TxPhase::Wait,
            })?;
        guard.rollback();
        Ok(f(&*guard))
    }
}
