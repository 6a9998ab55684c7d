// 4.0.2: result types and errors for ledger operations.

use crate::hierarchy::{DistributionKey, HierarchyError};
use crate::market::SettlementId;
use crate::settlement::Declaration;
use crate::store::TxPhase;
use crate::types::{EventId, MarketId, UserId, WagerId};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct Placement {
    pub wager_id: WagerId,
    /// Signed amount locked by the fast path; negative for a hedge.
    pub fast_lock: Decimal,
    pub remaining_credit: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyConfirmed,
    NotOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Confirmed(TrueUp),
    Skipped { wager_id: WagerId, reason: SkipReason },
}

/// What one reconciliation changed.
#[derive(Debug, Clone, PartialEq)]
pub struct TrueUp {
    pub wager_id: WagerId,
    pub user_id: UserId,
    pub fast_lock: Decimal,
    pub exact_lock: Decimal,
    /// Net change to the market lock. positive locks more, negative refunds.
    pub adjustment: Decimal,
    /// Wagers in the same book moved off their fast lock by this pass.
    pub confirmed: usize,
}

#[derive(Debug, Clone)]
pub struct SettlementResult {
    pub settlement_id: SettlementId,
    pub declaration: Declaration,
    pub wagers_settled: usize,
    pub won: usize,
    pub lost: usize,
    pub cancelled: usize,
    pub users_affected: Vec<UserId>,
    /// Sum of balance PnL over every settled wager.
    pub total_pnl: Decimal,
    /// Liability released back to balances before PnL was applied.
    pub released: Decimal,
    /// Users whose settled loss came out larger than the lock released for them.
    pub exposure_mismatches: usize,
    pub distribution_failures: usize,
}

#[derive(Debug, Clone)]
pub struct RollbackResult {
    pub settlement_id: SettlementId,
    pub wagers_reverted: usize,
    pub users_affected: Vec<UserId>,
    /// Exposure locked again for the reopened wagers.
    pub relocked: Decimal,
    pub already_rolled_back: bool,
    pub distribution_failures: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistributionResult {
    pub key: DistributionKey,
    pub net_pnl: Decimal,
    pub entries: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error(
        "Insufficient funds for user {user}: required {required}, available {available}, short by {shortfall}"
    )]
    InsufficientFunds {
        user: UserId,
        required: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },

    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("Market {market_id} in event {event_id} not found")]
    MarketNotFound { event_id: EventId, market_id: MarketId },

    #[error("Wager {0} not found")]
    WagerNotFound(WagerId),

    #[error("Settlement {0} not found")]
    SettlementNotFound(SettlementId),

    #[error("Market {0} is settled and closed to new wagers")]
    MarketClosed(SettlementId),

    #[error("Invalid wager: {0}")]
    InvalidWager(String),

    #[error("Invalid amount {0}")]
    InvalidAmount(Decimal),

    #[error("Invalid outcome: {0}")]
    InvalidOutcome(String),

    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(#[from] HierarchyError),

    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Transaction timed out while {phase}")]
    TransactionTimeout { phase: TxPhase },

    #[error("Settlement {0} is already active")]
    DuplicateSettlement(SettlementId),

    #[error("Placement failed: {source}")]
    PlacementFailed {
        #[source]
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    pub fn insufficient(user: UserId, required: Decimal, available: Decimal) -> Self {
        LedgerError::InsufficientFunds {
            user,
            required,
            available,
            shortfall: required - available,
        }
    }

    /// Stable machine-readable reason for synchronous callers.
    pub fn reason_code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::UserNotFound(_) => "USER_NOT_FOUND",
            LedgerError::MarketNotFound { .. } => "MARKET_NOT_FOUND",
            LedgerError::WagerNotFound(_) => "WAGER_NOT_FOUND",
            LedgerError::SettlementNotFound(_) => "SETTLEMENT_NOT_FOUND",
            LedgerError::MarketClosed(_) => "MARKET_CLOSED",
            LedgerError::InvalidWager(_) => "INVALID_WAGER",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::InvalidOutcome(_) => "INVALID_OUTCOME",
            LedgerError::InvalidHierarchy(_) => "INVALID_HIERARCHY",
            LedgerError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            LedgerError::TransactionTimeout { .. } => "TRANSACTION_TIMEOUT",
            LedgerError::DuplicateSettlement(_) => "DUPLICATE_SETTLEMENT",
            LedgerError::PlacementFailed { .. } => "PLACEMENT_FAILED",
        }
    }

    /// Only infrastructure timeouts are worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransactionTimeout { .. })
    }

    /// Errors placement reports verbatim; anything else becomes `PlacementFailed`.
    pub(super) fn into_placement_error(self) -> Self {
        match self {
            LedgerError::InsufficientFunds { .. }
            | LedgerError::UserNotFound(_)
            | LedgerError::MarketNotFound { .. }
            | LedgerError::MarketClosed(_)
            | LedgerError::InvalidWager(_)
            | LedgerError::TransactionTimeout { .. }
            | LedgerError::PlacementFailed { .. } => self,
            other => LedgerError::PlacementFailed {
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn shortfall_is_reported() {
        let err = LedgerError::insufficient(UserId(3), dec!(100), dec!(50));
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { shortfall, .. } if shortfall == dec!(50)
        ));
        assert_eq!(err.reason_code(), "INSUFFICIENT_FUNDS");
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_timeouts_retry() {
        let timeout = LedgerError::TransactionTimeout { phase: TxPhase::Wait };
        assert!(timeout.is_retryable());
        assert!(timeout.clone().into_placement_error().is_retryable());
    }

    #[test]
    fn internal_faults_are_wrapped_for_placement() {
        let err = LedgerError::InvariantViolation("broken".into()).into_placement_error();
        assert_eq!(err.reason_code(), "PLACEMENT_FAILED");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Ledger invariant violated: broken"));

        let passthrough = LedgerError::UserNotFound(UserId(1)).into_placement_error();
        assert_eq!(passthrough.reason_code(), "USER_NOT_FOUND");
    }
}
