// 6.0 settlement.rs: declared outcomes, the per-family win rule, and the settlement record.
// the engine drives the state machine; everything here is data plus pure rules.
//
//   (no settlement) -> active -> rolled back -> active again ...
//
// history is kept per settlement id so a rolled-back record is never lost.

use crate::market::{MarketFamily, SettlementId};
use crate::types::{SelectionId, Side, Timestamp, UserId};
use crate::wager::{Wager, WagerStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an operator declares for a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Declaration {
    /// Fixed-odds families: the winning selection.
    Winner(SelectionId),
    /// Fancy: the final number the line is judged against.
    Score(Decimal),
    /// Void the market and refund every open wager.
    Cancel,
}

impl Declaration {
    pub fn winner(&self) -> Option<&SelectionId> {
        match self {
            Declaration::Winner(selection) => Some(selection),
            _ => None,
        }
    }

    /// Whether this kind of declaration makes sense for `family`.
    pub fn fits(&self, family: MarketFamily) -> bool {
        match self {
            Declaration::Cancel => true,
            Declaration::Winner(_) => family != MarketFamily::Fancy,
            Declaration::Score(_) => family == MarketFamily::Fancy,
        }
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declaration::Winner(selection) => write!(f, "winner {selection}"),
            Declaration::Score(value) => write!(f, "score {value}"),
            Declaration::Cancel => f.write_str("cancel"),
        }
    }
}

/// Who performed a settlement or rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Auto,
    User(UserId),
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Auto => f.write_str("AUTO"),
            Operator::User(id) => write!(f, "{id}"),
        }
    }
}

/// 6.1: outcome for one wager: terminal status and signed balance PnL.
///
/// Winners collect `win_amount`, losers pay `loss_amount`. A cancelled wager
/// books 0 here because its stake comes back through the lock release.
pub fn resolve_wager(wager: &Wager, declaration: &Declaration) -> (WagerStatus, Decimal) {
    let wins = match declaration {
        Declaration::Cancel => return (WagerStatus::Cancelled, Decimal::ZERO),
        Declaration::Winner(winner) => match wager.side {
            Side::Back => wager.selection_id == *winner,
            Side::Lay => wager.selection_id != *winner,
        },
        Declaration::Score(value) => {
            let line = wager.line.unwrap_or(Decimal::ZERO);
            match wager.side {
                Side::Back => *value > line,
                Side::Lay => *value <= line,
            }
        }
    };
    if wins {
        (WagerStatus::Won, wager.win_amount)
    } else {
        (WagerStatus::Lost, -wager.loss_amount)
    }
}

/// One settlement of one market. At most one per id is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub settlement_id: SettlementId,
    pub declaration: Declaration,
    pub settled_by: Operator,
    pub settled_at: Timestamp,
    pub is_rollback: bool,
    pub rolled_back_by: Option<Operator>,
    pub rolled_back_at: Option<Timestamp>,
}

impl Settlement {
    pub fn new(
        settlement_id: SettlementId,
        declaration: Declaration,
        settled_by: Operator,
        settled_at: Timestamp,
    ) -> Self {
        Self {
            settlement_id,
            declaration,
            settled_by,
            settled_at,
            is_rollback: false,
            rolled_back_by: None,
            rolled_back_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.is_rollback
    }

    /// `None` on cancellation.
    pub fn winner_id(&self) -> Option<&SelectionId> {
        self.declaration.winner()
    }

    pub fn mark_rolled_back(&mut self, by: Operator, at: Timestamp) {
        self.is_rollback = true;
        self.rolled_back_by = Some(by);
        self.rolled_back_at = Some(at);
    }
}
