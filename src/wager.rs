//! Wagers and the derive-if-absent amount rule.
//!
//! A wager's `win_amount` and `loss_amount` are fixed exactly once, when the
//! wager is created. Every later consumer (exposure calculators, settlement,
//! reporting) reads the stored figures and never re-derives them from odds.

use crate::exposure::ExposureLeg;
use crate::market::{MarketFamily, SettlementId};
use crate::types::{EventId, MarketId, Odds, SelectionId, Side, Timestamp, UserId, WagerId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement status. `Pending` is the only open state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
    Cancelled,
}

impl WagerStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, WagerStatus::Pending)
    }

    pub fn is_settled(&self) -> bool {
        !self.is_open()
    }
}

/// Two-phase lock protocol for an open wager.
///
/// `Accepted` carries the fast-path estimate; `Confirmed` carries the exact
/// exposure delta computed by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileStage {
    Accepted,
    Confirmed,
}

/// What the caller asked for, before amounts are derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerTerms {
    pub selection_id: SelectionId,
    pub side: Side,
    pub stake: Decimal,
    pub odds: Odds,
    /// Numeric line for fancy markets.
    pub line: Option<Decimal>,
    /// Raw amounts some feeds supply. Zero or absent means "derive".
    pub win_amount: Option<Decimal>,
    pub loss_amount: Option<Decimal>,
}

impl WagerTerms {
    pub fn new(selection_id: SelectionId, side: Side, stake: Decimal, odds: Odds) -> Self {
        Self {
            selection_id,
            side,
            stake,
            odds,
            line: None,
            win_amount: None,
            loss_amount: None,
        }
    }

    pub fn with_line(mut self, line: Decimal) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_amounts(mut self, win: Option<Decimal>, loss: Option<Decimal>) -> Self {
        self.win_amount = win;
        self.loss_amount = loss;
        self
    }

    pub fn validate(&self, family: MarketFamily) -> Result<(), String> {
        if self.stake <= Decimal::ZERO {
            return Err(format!("stake must be positive, got {}", self.stake));
        }
        for (name, value) in [("win_amount", self.win_amount), ("loss_amount", self.loss_amount)] {
            if let Some(v) = value {
                if v < Decimal::ZERO {
                    return Err(format!("{name} cannot be negative, got {v}"));
                }
            }
        }
        match (family, self.line) {
            (MarketFamily::Fancy, None) => Err("fancy wagers need a line".to_string()),
            (MarketFamily::Fancy, Some(line)) if line < Decimal::ZERO => {
                Err(format!("fancy line cannot be negative, got {line}"))
            }
            (MarketFamily::MatchOdds | MarketFamily::Bookmaker, Some(_)) => {
                Err(format!("{family} wagers do not take a line"))
            }
            _ => Ok(()),
        }
    }

    /// Returns `(win_amount, loss_amount)`.
    ///
    /// Fixed-odds families: BACK wins `(odds-1)*stake` and risks the stake, LAY is
    /// the mirror. Fancy: liability is the stake on either side, except that a
    /// LAY may carry a supplied raw loss amount.
    pub fn derive_amounts(&self, family: MarketFamily) -> (Decimal, Decimal) {
        let supplied = |v: Option<Decimal>| v.filter(|x| *x > Decimal::ZERO);
        let profit = self.stake * self.odds.net_multiplier();

        match (family, self.side) {
            (MarketFamily::Fancy, Side::Back) => {
                (supplied(self.win_amount).unwrap_or(profit), self.stake)
            }
            (MarketFamily::Fancy, Side::Lay) => (
                supplied(self.win_amount).unwrap_or(self.stake),
                supplied(self.loss_amount).unwrap_or(self.stake),
            ),
            (_, Side::Back) => (
                supplied(self.win_amount).unwrap_or(profit),
                supplied(self.loss_amount).unwrap_or(self.stake),
            ),
            (_, Side::Lay) => (
                supplied(self.win_amount).unwrap_or(self.stake),
                supplied(self.loss_amount).unwrap_or(profit),
            ),
        }
    }
}

/// A placed wager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub market_id: MarketId,
    pub selection_id: SelectionId,
    pub side: Side,
    pub stake: Decimal,
    pub odds: Odds,
    pub line: Option<Decimal>,
    pub win_amount: Decimal,
    pub loss_amount: Decimal,
    pub family: MarketFamily,
    pub settlement_id: SettlementId,
    pub status: WagerStatus,
    pub stage: ReconcileStage,
    /// Amount locked by the fast path when the wager was accepted (signed; hedges are negative).
    pub fast_lock: Decimal,
    /// Current contribution of this wager to the wallet's liability.
    pub locked: Decimal,
    pub pnl: Option<Decimal>,
    pub placed_at: Timestamp,
    pub reconciled_at: Option<Timestamp>,
    pub settled_at: Option<Timestamp>,
}

impl Wager {
    pub fn new(
        id: WagerId,
        user_id: UserId,
        event_id: EventId,
        market_id: MarketId,
        family: MarketFamily,
        terms: &WagerTerms,
        placed_at: Timestamp,
    ) -> Self {
        let (win_amount, loss_amount) = terms.derive_amounts(family);
        let settlement_id = SettlementId::new(family, &event_id, &market_id);
        Self {
            id,
            user_id,
            event_id,
            market_id,
            selection_id: terms.selection_id.clone(),
            side: terms.side,
            stake: terms.stake,
            odds: terms.odds,
            line: terms.line,
            win_amount,
            loss_amount,
            family,
            settlement_id,
            status: WagerStatus::Pending,
            stage: ReconcileStage::Accepted,
            fast_lock: Decimal::ZERO,
            locked: Decimal::ZERO,
            pnl: None,
            placed_at,
            reconciled_at: None,
            settled_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn awaiting_reconciliation(&self) -> bool {
        self.is_open() && self.stage == ReconcileStage::Accepted
    }

    pub fn leg(&self) -> ExposureLeg {
        ExposureLeg {
            family: self.family,
            selection_id: self.selection_id.clone(),
            side: self.side,
            line: self.line,
            win: self.win_amount,
            loss: self.loss_amount,
        }
    }
}
