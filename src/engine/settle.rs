// 4.4 engine/settle.rs: market settlement and rollback.
// settle: true-up stragglers, release each user's market lock, book net PnL, record.
// rollback: reverse PnL, reopen wagers, re-lock exact exposure, flag the record.
// both regenerate summaries and hierarchy entries after commit.

use super::core::{exposure_changed, wallet_error, Ledger};
use super::reconcile::true_up;
use super::results::{LedgerError, RollbackResult, SettlementResult};
use crate::events::{EventPayload, MarketSettledEvent, SettlementRolledBackEvent};
use crate::exposure::exposure_delta;
use crate::hierarchy::DistributionKey;
use crate::market::{MarketFamily, SettlementId};
use crate::settlement::{resolve_wager, Declaration, Operator, Settlement};
use crate::store::LedgerState;
use crate::types::{EventId, MarketId, Timestamp, UserId, WagerId};
use crate::wager::{ReconcileStage, WagerStatus};
use crate::wallet::Wallet;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

impl Ledger {
    pub fn settle_market(
        &self,
        event_id: &EventId,
        market_id: &MarketId,
        declaration: Declaration,
        operator: Operator,
    ) -> Result<SettlementResult, LedgerError> {
        let now = self.now();
        let committed = self.store.transaction(|state| {
            apply_settlement(state, event_id, market_id, &declaration, &operator, now)
        });

        let (mut result, keys, wallets) = match committed {
            Ok(done) => done,
            Err(err) => {
                if matches!(err, LedgerError::InvariantViolation(_)) {
                    error!(
                        market_id = %market_id,
                        error = %err,
                        "settlement aborted on ledger invariant"
                    );
                } else {
                    warn!(market_id = %market_id, error = %err, "settlement rejected");
                }
                return Err(err);
            }
        };

        info!(
            settlement_id = %result.settlement_id,
            declaration = %result.declaration,
            settled_by = %operator,
            wagers = result.wagers_settled,
            total_pnl = %result.total_pnl,
            released = %result.released,
            "market settled"
        );

        let mut payloads = vec![EventPayload::MarketSettled(MarketSettledEvent {
            settlement_id: result.settlement_id.clone(),
            declaration: result.declaration.clone(),
            wagers_settled: result.wagers_settled,
            users: result.users_affected.clone(),
        })];
        payloads.extend(wallets.iter().map(exposure_changed));
        self.publish(payloads);

        result.distribution_failures = self.regenerate_all(&keys);
        Ok(result)
    }

    /// Safe to call again after a partial failure; a rolled-back settlement only
    /// has its summaries and hierarchy entries regenerated.
    pub fn rollback_settlement(
        &self,
        settlement_id: &SettlementId,
        operator: Operator,
    ) -> Result<RollbackResult, LedgerError> {
        let now = self.now();
        let committed = self
            .store
            .transaction(|state| apply_rollback(state, settlement_id, &operator, now));

        let (mut result, keys, wallets) = match committed {
            Ok(done) => done,
            Err(err) => {
                warn!(settlement_id = %settlement_id, error = %err, "rollback rejected");
                return Err(err);
            }
        };

        if result.already_rolled_back {
            info!(
                settlement_id = %settlement_id,
                "settlement already rolled back, regenerating ledgers"
            );
        } else {
            info!(
                settlement_id = %settlement_id,
                rolled_back_by = %operator,
                wagers = result.wagers_reverted,
                relocked = %result.relocked,
                "settlement rolled back"
            );
            let mut payloads = vec![EventPayload::SettlementRolledBack(SettlementRolledBackEvent {
                settlement_id: settlement_id.clone(),
                wagers_reverted: result.wagers_reverted,
                users: result.users_affected.clone(),
            })];
            payloads.extend(wallets.iter().map(exposure_changed));
            self.publish(payloads);
        }

        result.distribution_failures = self.regenerate_all(&keys);
        Ok(result)
    }

    fn regenerate_all(&self, keys: &[DistributionKey]) -> usize {
        let mut failures = 0;
        for key in keys {
            if let Err(err) = self.regenerate(key) {
                failures += 1;
                error!(
                    user_id = %key.user_id,
                    event_id = %key.event_id,
                    family = %key.family,
                    error = %err,
                    "hierarchy distribution failed"
                );
            }
        }
        failures
    }
}

type Committed<T> = (T, Vec<DistributionKey>, Vec<Wallet>);

fn apply_settlement(
    state: &mut LedgerState,
    event_id: &EventId,
    market_id: &MarketId,
    declaration: &Declaration,
    operator: &Operator,
    now: Timestamp,
) -> Result<Committed<SettlementResult>, LedgerError> {
    let market = state.market(event_id, market_id)?.clone();
    let settlement_id = market.settlement_id();
    if state.active_settlement(&settlement_id).is_some() {
        return Err(LedgerError::DuplicateSettlement(settlement_id));
    }
    if !declaration.fits(market.family) {
        return Err(LedgerError::InvalidOutcome(format!(
            "{declaration} does not apply to a {} market",
            market.family
        )));
    }
    if let Some(winner) = declaration.winner() {
        if market.runners_known() && !market.has_runner(winner) {
            return Err(LedgerError::InvalidOutcome(format!(
                "{winner} is not a runner in market {market_id}"
            )));
        }
    }

    let open: Vec<WagerId> = state
        .wagers
        .in_market(&settlement_id)
        .filter(|w| w.is_open())
        .map(|w| w.id)
        .collect();

    // stragglers get their exact lock before anything is released
    for id in &open {
        let wager = state.wager(*id)?;
        if wager.stage != ReconcileStage::Accepted {
            continue;
        }
        let (user, fast_lock) = (wager.user_id, wager.fast_lock);
        match true_up(state, *id, now) {
            Ok(_) => {}
            Err(LedgerError::InvariantViolation(reason)) => {
                warn!(wager_id = %id, reason = %reason, "settling on the fast lock");
                state.wallet_mut(user)?.clear_provisional(fast_lock);
                let mut wager = state.wager_mut(*id)?;
                wager.stage = ReconcileStage::Confirmed;
                wager.reconciled_at = Some(now);
            }
            Err(err) => return Err(err),
        }
    }

    let mut locked_by_user: BTreeMap<UserId, Decimal> = BTreeMap::new();
    let mut pnl_by_user: BTreeMap<UserId, Decimal> = BTreeMap::new();
    let (mut won, mut lost, mut cancelled) = (0, 0, 0);

    for id in &open {
        let mut wager = state.wager_mut(*id)?;
        let (status, pnl) = resolve_wager(&wager, declaration);
        match status {
            WagerStatus::Won => won += 1,
            WagerStatus::Lost => lost += 1,
            _ => cancelled += 1,
        }
        *locked_by_user.entry(wager.user_id).or_default() += wager.locked;
        *pnl_by_user.entry(wager.user_id).or_default() += pnl;
        wager.status = status;
        wager.pnl = Some(pnl);
        wager.settled_at = Some(now);
        wager.locked = Decimal::ZERO;
    }

    let mut released_total = Decimal::ZERO;
    let mut mismatches = 0;
    let mut wallets = Vec::with_capacity(pnl_by_user.len());
    for (user, pnl) in &pnl_by_user {
        let locked = locked_by_user.get(user).copied().unwrap_or_default();
        let wallet = state.wallet_mut(*user)?;
        let moved = wallet.adjust_lock(-locked).map_err(|e| wallet_error(*user, e))?;
        if moved != -locked {
            return Err(LedgerError::InvariantViolation(format!(
                "user {user} had {} liability left for a {locked} market lock",
                -moved
            )));
        }
        if -*pnl > locked {
            mismatches += 1;
            warn!(
                user_id = %user,
                settlement_id = %settlement_id,
                loss = %(-*pnl),
                released = %locked,
                "settled loss exceeds released exposure"
            );
        }
        wallet.apply_pnl(*pnl).map_err(|e| wallet_error(*user, e))?;
        released_total += locked;
        wallets.push(wallet.clone());
    }

    state
        .settlements
        .get_or_default(settlement_id.clone())
        .push(Settlement::new(
            settlement_id.clone(),
            declaration.clone(),
            operator.clone(),
            now,
        ));

    let users: Vec<UserId> = pnl_by_user.keys().copied().collect();
    let keys = distribution_keys(&users, &market.event_id, market.family);
    let result = SettlementResult {
        settlement_id,
        declaration: declaration.clone(),
        wagers_settled: open.len(),
        won,
        lost,
        cancelled,
        users_affected: users,
        total_pnl: pnl_by_user.values().copied().sum(),
        released: released_total,
        exposure_mismatches: mismatches,
        distribution_failures: 0,
    };
    Ok((result, keys, wallets))
}

fn apply_rollback(
    state: &mut LedgerState,
    settlement_id: &SettlementId,
    operator: &Operator,
    now: Timestamp,
) -> Result<Committed<RollbackResult>, LedgerError> {
    let latest = state
        .settlements
        .get(settlement_id)
        .and_then(|history| history.last())
        .ok_or_else(|| LedgerError::SettlementNotFound(settlement_id.clone()))?;
    let (event_id, family) = match state.market_wager_ids(settlement_id).first() {
        Some(id) => {
            let w = state.wager(*id)?;
            (w.event_id.clone(), w.family)
        }
        None => {
            let (family, event_id, _) = SettlementId::parse(settlement_id.as_str())
                .ok_or_else(|| LedgerError::SettlementNotFound(settlement_id.clone()))?;
            (event_id, family)
        }
    };

    if !latest.is_active() {
        let mut users: Vec<UserId> = state
            .wagers
            .in_market(settlement_id)
            .map(|w| w.user_id)
            .collect();
        users.sort();
        users.dedup();
        let keys = distribution_keys(&users, &event_id, family);
        let result = RollbackResult {
            settlement_id: settlement_id.clone(),
            wagers_reverted: 0,
            users_affected: users,
            relocked: Decimal::ZERO,
            already_rolled_back: true,
            distribution_failures: 0,
        };
        return Ok((result, keys, Vec::new()));
    }

    let settled: Vec<WagerId> = state
        .wagers
        .in_market(settlement_id)
        .filter(|w| w.status.is_settled())
        .map(|w| w.id)
        .collect();

    let mut pnl_by_user: BTreeMap<UserId, Decimal> = BTreeMap::new();
    for id in &settled {
        let mut wager = state.wager_mut(*id)?;
        *pnl_by_user.entry(wager.user_id).or_default() += wager.pnl.unwrap_or_default();
        wager.status = WagerStatus::Pending;
        wager.stage = ReconcileStage::Confirmed;
        wager.pnl = None;
        wager.settled_at = None;
        wager.locked = Decimal::ZERO;
    }

    for (user, pnl) in &pnl_by_user {
        let wallet = state.wallet_mut(*user)?;
        if wallet.apply_pnl(-*pnl).is_err() {
            return Err(LedgerError::insufficient(*user, *pnl, wallet.balance));
        }
    }

    // re-lock in placement order so each delta sits on top of its prefix
    let mut relocked = Decimal::ZERO;
    for id in &settled {
        let wager = state.wager(*id)?.clone();
        let runners = state
            .market(&wager.event_id, &wager.market_id)?
            .runners
            .clone();
        let prefix = state.prefix_legs(&wager);
        let exact = exposure_delta(wager.family, &prefix, &wager.leg(), &runners);
        let wallet = state.wallet_mut(wager.user_id)?;
        wallet
            .adjust_lock(exact)
            .map_err(|e| wallet_error(wager.user_id, e))?;
        state.wager_mut(*id)?.locked = exact;
        relocked += exact;
    }

    if let Some(latest) = state
        .settlements
        .get_mut(settlement_id)
        .and_then(|history| history.last_mut())
    {
        latest.mark_rolled_back(operator.clone(), now);
    }

    let users: Vec<UserId> = pnl_by_user.keys().copied().collect();
    let mut wallets = Vec::with_capacity(users.len());
    for user in &users {
        wallets.push(state.wallet(*user)?.clone());
    }
    let keys = distribution_keys(&users, &event_id, family);
    let result = RollbackResult {
        settlement_id: settlement_id.clone(),
        wagers_reverted: settled.len(),
        users_affected: users,
        relocked,
        already_rolled_back: false,
        distribution_failures: 0,
    };
    Ok((result, keys, wallets))
}

fn distribution_keys(
    users: &[UserId],
    event_id: &EventId,
    family: MarketFamily,
) -> Vec<DistributionKey> {
    users
        .iter()
        .map(|user| DistributionKey {
            user_id: *user,
            event_id: event_id.clone(),
            family,
        })
        .collect()
}
