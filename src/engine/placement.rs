// 4.2 engine/placement.rs: fast-path acceptance.
// one transaction: validate, net against the opposite side, lock the estimate, insert.
// the exact figure arrives later from reconciliation.

use super::core::{exposure_changed, wallet_error, Ledger};
use super::results::{LedgerError, Placement};
use crate::events::{EventPayload, WagerAcceptedEvent};
use crate::exposure::{exposure_delta, fast_estimate, required_lock, ExposureLeg};
use crate::market::MarketFamily;
use crate::types::{EventId, MarketId, Odds, SelectionId, Side, UserId};
use crate::wager::{Wager, WagerTerms};
use crate::wallet::Wallet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Inbound placement request, as the request layer hands it over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerRequest {
    pub user_id: UserId,
    pub event_id: EventId,
    pub market_id: MarketId,
    pub selection_id: SelectionId,
    pub side: Side,
    pub stake: Decimal,
    pub odds: Decimal,
    pub market_type_hint: Option<String>,
    pub line: Option<Decimal>,
    pub win_amount: Option<Decimal>,
    pub loss_amount: Option<Decimal>,
}

impl WagerRequest {
    pub fn new(
        user_id: UserId,
        event_id: impl Into<EventId>,
        market_id: impl Into<MarketId>,
        selection_id: impl Into<SelectionId>,
        side: Side,
        stake: Decimal,
        odds: Decimal,
    ) -> Self {
        Self {
            user_id,
            event_id: event_id.into(),
            market_id: market_id.into(),
            selection_id: selection_id.into(),
            side,
            stake,
            odds,
            market_type_hint: None,
            line: None,
            win_amount: None,
            loss_amount: None,
        }
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.market_type_hint = Some(hint.into());
        self
    }

    pub fn line(mut self, line: Decimal) -> Self {
        self.line = Some(line);
        self
    }

    pub fn amounts(mut self, win: Option<Decimal>, loss: Option<Decimal>) -> Self {
        self.win_amount = win;
        self.loss_amount = loss;
        self
    }

    fn terms(&self) -> Result<WagerTerms, LedgerError> {
        let odds = Odds::new(self.odds)
            .ok_or_else(|| LedgerError::InvalidWager(format!("odds {} must exceed 1", self.odds)))?;
        let mut terms = WagerTerms::new(self.selection_id.clone(), self.side, self.stake, odds)
            .with_amounts(self.win_amount, self.loss_amount);
        terms.line = self.line;
        Ok(terms)
    }
}

impl Ledger {
    /// Accept a wager and lock its fast-path estimate.
    pub fn place_wager(&self, request: WagerRequest) -> Result<Placement, LedgerError> {
        let user = request.user_id;
        let result = self.accept(&request).map_err(LedgerError::into_placement_error);

        let (placement, wager, wallet) = match result {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(
                    user_id = %user,
                    market_id = %request.market_id,
                    reason = err.reason_code(),
                    error = %err,
                    "placement rejected"
                );
                return Err(err);
            }
        };

        info!(
            user_id = %user,
            wager_id = %placement.wager_id,
            settlement_id = %wager.settlement_id,
            side = %wager.side,
            stake = %wager.stake,
            fast_lock = %placement.fast_lock,
            remaining_credit = %placement.remaining_credit,
            "wager accepted"
        );

        self.publish(vec![
            EventPayload::WagerAccepted(WagerAcceptedEvent {
                wager_id: wager.id,
                user_id: user,
                event_id: wager.event_id.clone(),
                market_id: wager.market_id.clone(),
                side: wager.side,
                stake: wager.stake,
                fast_lock: placement.fast_lock,
            }),
            exposure_changed(&wallet),
        ]);
        self.schedule_reconciliation(placement.wager_id);
        Ok(placement)
    }

    fn accept(
        &self,
        request: &WagerRequest,
    ) -> Result<(Placement, Wager, Wallet), LedgerError> {
        let terms = request.terms()?;
        let now = self.now();

        self.store.transaction(|state| {
            let user = request.user_id;
            let account = state.account(user)?;
            if !account.role.can_bet() {
                return Err(LedgerError::InvalidWager(format!(
                    "user {user} is a {:?}, only clients place wagers",
                    account.role
                )));
            }

            let market = state.market(&request.event_id, &request.market_id)?.clone();
            let settlement_id = market.settlement_id();
            if state.active_settlement(&settlement_id).is_some() {
                return Err(LedgerError::MarketClosed(settlement_id));
            }

            // the catalog owns the family; a hint may only confirm it
            let family = market.family;
            let hinted = request
                .market_type_hint
                .as_deref()
                .and_then(MarketFamily::classify);
            if let Some(hinted) = hinted {
                if hinted != family {
                    return Err(LedgerError::InvalidWager(format!(
                        "hint resolves to {hinted} but market {} is {family}",
                        market.market_id
                    )));
                }
            }
            terms.validate(family).map_err(LedgerError::InvalidWager)?;
            if family != MarketFamily::Fancy
                && market.runners_known()
                && !market.has_runner(&terms.selection_id)
            {
                return Err(LedgerError::InvalidWager(format!(
                    "selection {} is not a runner in market {}",
                    terms.selection_id, market.market_id
                )));
            }

            let open: Vec<ExposureLeg> = state
                .open_wagers(user, &settlement_id)
                .map(Wager::leg)
                .collect();
            let market_locked: Decimal = state
                .open_wagers(user, &settlement_id)
                .map(|w| w.locked)
                .sum();

            let wager_id = state.allocate_wager_id();
            let mut wager = Wager::new(
                wager_id,
                user,
                request.event_id.clone(),
                request.market_id.clone(),
                family,
                &terms,
                now,
            );
            let candidate = wager.leg();

            let available = state.wallet(user)?.balance;
            let required = required_lock(&open, &candidate);
            if required > available {
                return Err(LedgerError::insufficient(user, required, available));
            }

            // fold the candidate into a fresh estimate of the whole market
            let before = fast_estimate(family, &open);
            let exact = exposure_delta(family, &open, &candidate, &market.runners);
            let mut with_candidate = open;
            with_candidate.push(candidate);
            let after = fast_estimate(family, &with_candidate);
            // never below the exact delta, and a hedge only hands back what this market holds
            let lock = (after - before).max(exact).max(-market_locked);
            if lock > available {
                return Err(LedgerError::insufficient(user, lock, available));
            }

            let wallet = state.wallet_mut(user)?;
            wallet
                .adjust_lock(lock)
                .map_err(|e| wallet_error(user, e))?;
            wallet.note_provisional(lock);
            let wallet = wallet.clone();

            wager.fast_lock = lock;
            wager.locked = lock;
            state.wagers.insert(wager.clone());

            let placement = Placement {
                wager_id,
                fast_lock: lock,
                remaining_credit: wallet.balance,
            };
            Ok((placement, wager, wallet))
        })
    }
}
