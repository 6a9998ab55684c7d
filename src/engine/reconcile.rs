// 4.3 engine/reconcile.rs: replace a fast-path lock with the exact exposure delta.
// keyed by wager id. safe against duplicate and out-of-order delivery: anything not
// open-and-accepted is skipped. a failure leaves the fast lock in place.

use super::core::{exposure_changed, Ledger};
use super::results::{LedgerError, ReconcileOutcome, SkipReason, TrueUp};
use crate::events::{EventPayload, WagerReconciledEvent};
use crate::exposure::exposure_delta;
use crate::store::LedgerState;
use crate::types::{Timestamp, WagerId};
use crate::wager::{ReconcileStage, Wager};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

impl Ledger {
    /// Idempotent: a second call for the same wager is a logged no-op.
    pub fn reconcile(&self, wager_id: WagerId) -> Result<ReconcileOutcome, LedgerError> {
        let now = self.now();
        let result = self.store.transaction(|state| {
            let wager = state.wager(wager_id)?;
            if !wager.is_open() {
                return Ok((skipped(wager_id, SkipReason::NotOpen), None));
            }
            if wager.stage == ReconcileStage::Confirmed {
                return Ok((skipped(wager_id, SkipReason::AlreadyConfirmed), None));
            }
            let user = wager.user_id;
            let true_up = true_up(state, wager_id, now)?;
            let wallet = state.wallet(user)?.clone();
            Ok((ReconcileOutcome::Confirmed(true_up), Some(wallet)))
        });

        match result {
            Ok((ReconcileOutcome::Confirmed(true_up), Some(wallet))) => {
                info!(
                    wager_id = %wager_id,
                    user_id = %true_up.user_id,
                    fast_lock = %true_up.fast_lock,
                    exact_lock = %true_up.exact_lock,
                    adjustment = %true_up.adjustment,
                    confirmed = true_up.confirmed,
                    "wager reconciled"
                );
                self.publish(vec![
                    EventPayload::WagerReconciled(WagerReconciledEvent {
                        wager_id,
                        user_id: true_up.user_id,
                        fast_lock: true_up.fast_lock,
                        exact_lock: true_up.exact_lock,
                    }),
                    exposure_changed(&wallet),
                ]);
                Ok(ReconcileOutcome::Confirmed(true_up))
            }
            Ok((outcome, _)) => {
                debug!(wager_id = %wager_id, outcome = ?outcome, "reconciliation skipped");
                Ok(outcome)
            }
            Err(err @ LedgerError::InvariantViolation(_)) => {
                error!(
                    wager_id = %wager_id,
                    error = %err,
                    "reconciliation hit a ledger invariant, fast lock kept"
                );
                Err(err)
            }
            Err(err) => {
                warn!(wager_id = %wager_id, error = %err, "reconciliation failed, fast lock kept");
                Err(err)
            }
        }
    }
}

fn skipped(wager_id: WagerId, reason: SkipReason) -> ReconcileOutcome {
    ReconcileOutcome::Skipped { wager_id, reason }
}

/// Bring the user's whole book in the wager's market to exact locks.
///
/// Each open wager is locked at its delta against the earlier wagers in the same
/// market, so the locks add up to the exact market exposure whatever order jobs
/// run in. Every wager still on a fast lock in that book is confirmed with it;
/// their own jobs then skip.
pub(super) fn true_up(
    state: &mut LedgerState,
    wager_id: WagerId,
    now: Timestamp,
) -> Result<TrueUp, LedgerError> {
    let wager = state.wager(wager_id)?.clone();
    let runners = state
        .market(&wager.event_id, &wager.market_id)?
        .runners
        .clone();

    let book: Vec<Wager> = state
        .open_wagers(wager.user_id, &wager.settlement_id)
        .cloned()
        .collect();
    let mut legs = Vec::with_capacity(book.len());
    let mut exact = Vec::with_capacity(book.len());
    for open in &book {
        let leg = open.leg();
        exact.push((open.id, exposure_delta(open.family, &legs, &leg, &runners)));
        legs.push(leg);
    }

    let held: Decimal = book.iter().map(|w| w.locked).sum();
    let target: Decimal = exact.iter().map(|(_, lock)| *lock).sum();
    let adjustment = target - held;
    let provisional: Decimal = book
        .iter()
        .filter(|w| w.stage == ReconcileStage::Accepted)
        .map(|w| w.fast_lock)
        .sum();

    let wallet = state.wallet_mut(wager.user_id)?;
    if adjustment > wallet.balance {
        return Err(LedgerError::InvariantViolation(format!(
            "true-up of wager {wager_id} needs {adjustment} more but user {} has {}",
            wager.user_id, wallet.balance
        )));
    }
    if -adjustment > wallet.liability {
        return Err(LedgerError::InvariantViolation(format!(
            "wager {wager_id} refund of {} exceeds liability {}",
            -adjustment, wallet.liability
        )));
    }
    // cannot fail after the two checks above
    wallet.adjust_lock(adjustment).map_err(|e| {
        LedgerError::InvariantViolation(format!("true-up for wager {wager_id}: {e}"))
    })?;
    wallet.clear_provisional(provisional);

    let mut confirmed = 0;
    let mut exact_lock = Decimal::ZERO;
    for (id, lock) in exact {
        let mut stored = state.wager_mut(id)?;
        stored.locked = lock;
        if stored.stage == ReconcileStage::Accepted {
            stored.stage = ReconcileStage::Confirmed;
            stored.reconciled_at = Some(now);
            confirmed += 1;
        }
        if id == wager_id {
            exact_lock = lock;
        }
    }

    Ok(TrueUp {
        wager_id,
        user_id: wager.user_id,
        fast_lock: wager.fast_lock,
        exact_lock,
        adjustment,
        confirmed,
    })
}
