// 4.0 engine/core.rs: the ledger. owns the store, the event log, and the outbound seams
// (event sink, reconciliation scheduler). accounts, deposits, catalog and reads live here.

use super::results::LedgerError;
use crate::config::LedgerConfig;
use crate::events::{EventLog, EventPayload, EventSink, ExposureChangedEvent, LedgerEvent};
use crate::exposure;
use crate::hierarchy::{
    validate_new_account, Account, DistributionKey, HierarchyError, HierarchyPnlEntry, PnlSummary,
    Role,
};
use crate::market::{Market, SettlementId};
use crate::settlement::Settlement;
use crate::store::MemoryStore;
use crate::types::{EventId, MarketId, SelectionId, Timestamp, UserId, WagerId};
use crate::wager::Wager;
use crate::wallet::{Wallet, WalletError};
use crate::worker::ReconcileScheduler;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

/** 4.1: main ledger struct. all persistent state sits in the store */
pub struct Ledger {
    pub(super) config: LedgerConfig,
    pub(super) store: MemoryStore,
    pub(super) events: Mutex<EventLog>,
    pub(super) sink: Option<Arc<dyn EventSink>>,
    pub(super) scheduler: Option<Arc<dyn ReconcileScheduler>>,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            store: MemoryStore::new(config.transactions.clone()),
            events: Mutex::new(EventLog::new(config.max_events)),
            sink: None,
            scheduler: None,
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Without a scheduler, callers drive `reconcile` themselves.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn ReconcileScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(super) fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    pub fn create_account(
        &self,
        role: Role,
        parent: Option<UserId>,
        commission_pct: Decimal,
    ) -> Result<UserId, LedgerError> {
        let now = self.now();
        let id = self.store.transaction(|state| {
            let parent_account = match parent {
                Some(parent_id) => Some(
                    state
                        .account(parent_id)
                        .map_err(|_| HierarchyError::ParentNotFound(parent_id))?,
                ),
                None => None,
            };
            validate_new_account(role, parent_account, commission_pct)?;

            let id = state.allocate_user_id();
            state.accounts.insert(
                id,
                Account {
                    id,
                    role,
                    parent,
                    commission_pct,
                    created_at: now,
                },
            );
            state.wallets.insert(id, Wallet::new(id, now));
            Ok(id)
        })?;
        info!(user_id = %id, role = ?role, "account created");
        Ok(id)
    }

    pub fn deposit(&self, user: UserId, amount: Decimal) -> Result<Decimal, LedgerError> {
        let wallet = self.store.transaction(|state| {
            let wallet = state.wallet_mut(user)?;
            wallet.deposit(amount).map_err(|e| wallet_error(user, e))?;
            Ok(wallet.clone())
        })?;
        self.publish(vec![exposure_changed(&wallet)]);
        Ok(wallet.balance)
    }

    pub fn withdraw(&self, user: UserId, amount: Decimal) -> Result<Decimal, LedgerError> {
        let wallet = self.store.transaction(|state| {
            let wallet = state.wallet_mut(user)?;
            wallet.withdraw(amount).map_err(|e| wallet_error(user, e))?;
            Ok(wallet.clone())
        })?;
        self.publish(vec![exposure_changed(&wallet)]);
        Ok(wallet.balance)
    }

    /// Add a market to the catalog, or merge new runners into an existing one.
    pub fn register_market(
        &self,
        event_id: EventId,
        market_id: MarketId,
        name: &str,
        type_hint: Option<&str>,
        runners: Vec<SelectionId>,
    ) -> Result<SettlementId, LedgerError> {
        let now = self.now();
        let market = Market::new(event_id, market_id, name, type_hint, runners, now);
        let settlement_id = self.store.transaction(|state| {
            let key = (market.event_id.clone(), market.market_id.clone());
            match state.markets.get_mut(&key) {
                Some(existing) => {
                    if existing.family != market.family {
                        return Err(LedgerError::InvalidWager(format!(
                            "market {} already registered as {}",
                            market.market_id, existing.family
                        )));
                    }
                    for runner in market.runners {
                        if !existing.has_runner(&runner) {
                            existing.runners.push(runner);
                        }
                    }
                    Ok(existing.settlement_id())
                }
                None => {
                    let id = market.settlement_id();
                    state.markets.insert(key, market);
                    Ok(id)
                }
            }
        })?;
        info!(settlement_id = %settlement_id, "market registered");
        Ok(settlement_id)
    }

    pub fn account(&self, user: UserId) -> Result<Account, LedgerError> {
        self.store.read(|s| s.account(user).cloned())?
    }

    pub fn wallet(&self, user: UserId) -> Result<Wallet, LedgerError> {
        self.store.read(|s| s.wallet(user).cloned())?
    }

    pub fn market(&self, event_id: &EventId, market_id: &MarketId) -> Result<Market, LedgerError> {
        self.store.read(|s| s.market(event_id, market_id).cloned())?
    }

    pub fn wager(&self, id: WagerId) -> Result<Wager, LedgerError> {
        self.store.read(|s| s.wager(id).cloned())?
    }

    pub fn wagers_for(&self, user: UserId) -> Result<Vec<Wager>, LedgerError> {
        self.store
            .read(|s| s.wagers.for_user(user).cloned().collect())
    }

    /// Open wagers still carrying a fast-path lock. Feed these back to the scheduler
    /// after a restart or a dropped job.
    pub fn unreconciled_wagers(&self) -> Result<Vec<WagerId>, LedgerError> {
        self.store.read(|s| {
            let mut ids: Vec<WagerId> = s
                .wagers
                .open()
                .filter(|w| w.awaiting_reconciliation())
                .map(|w| w.id)
                .collect();
            ids.sort();
            ids
        })
    }

    /// Exact worst-case exposure of a user's open wagers in one market.
    pub fn market_exposure(
        &self,
        user: UserId,
        event_id: &EventId,
        market_id: &MarketId,
    ) -> Result<Decimal, LedgerError> {
        self.store.read(|s| {
            let market = s.market(event_id, market_id)?;
            let settlement_id = market.settlement_id();
            let legs: Vec<_> = s.open_wagers(user, &settlement_id).map(Wager::leg).collect();
            Ok(exposure::exposure(market.family, &legs, &market.runners))
        })?
    }

    pub fn settlement_history(&self, id: &SettlementId) -> Result<Vec<Settlement>, LedgerError> {
        self.store
            .read(|s| s.settlements.get(id).cloned().unwrap_or_default())
    }

    pub fn active_settlement(&self, id: &SettlementId) -> Result<Option<Settlement>, LedgerError> {
        self.store.read(|s| s.active_settlement(id).cloned())
    }

    pub fn pnl_summary(&self, key: &DistributionKey) -> Result<Option<PnlSummary>, LedgerError> {
        self.store.read(|s| s.summaries.get(key).cloned())
    }

    pub fn hierarchy_entries(
        &self,
        key: &DistributionKey,
    ) -> Result<Vec<HierarchyPnlEntry>, LedgerError> {
        self.store.read(|s| {
            s.hierarchy_entries
                .values()
                .filter(|e| {
                    e.from_user == key.user_id && e.event_id == key.event_id && e.family == key.family
                })
                .cloned()
                .collect()
        })
    }

    pub fn recent_events(&self, count: usize) -> Vec<LedgerEvent> {
        self.events.lock().recent(count)
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().all()
    }

    /// Audit trail for one user, as a notifier would replay it.
    pub fn events_for(&self, user: UserId) -> Vec<LedgerEvent> {
        self.events.lock().for_user(user)
    }

    /// Record committed changes and hand them to the sink. Call only after commit.
    pub(super) fn publish(&self, payloads: Vec<EventPayload>) {
        let now = self.now();
        for payload in payloads {
            let event = self.events.lock().record(now, payload);
            if let Some(sink) = &self.sink {
                sink.publish(&event);
            }
        }
    }

    pub(super) fn schedule_reconciliation(&self, wager_id: WagerId) {
        match &self.scheduler {
            Some(scheduler) => scheduler.schedule(wager_id),
            None => debug!(wager_id = %wager_id, "no reconciliation scheduler, caller reconciles"),
        }
    }
}

pub(super) fn exposure_changed(wallet: &Wallet) -> EventPayload {
    EventPayload::ExposureChanged(ExposureChangedEvent {
        user_id: wallet.user_id,
        balance: wallet.balance,
        liability: wallet.liability,
    })
}

pub(super) fn wallet_error(user: UserId, err: WalletError) -> LedgerError {
    match err {
        WalletError::InsufficientFunds {
            required,
            available,
        } => LedgerError::insufficient(user, required, available),
        WalletError::InvalidAmount(amount) => LedgerError::InvalidAmount(amount),
        WalletError::NegativeBalance { balance, pnl } => LedgerError::InvariantViolation(format!(
            "pnl {pnl} would overdraw user {user} balance {balance}"
        )),
    }
}
