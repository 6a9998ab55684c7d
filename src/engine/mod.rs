// 4.0: the ledger engine. coordinates placement, reconciliation, settlement,
// rollback and hierarchy distribution over the transactional store.
// synchronous and lock-scoped; the async worker pool lives in worker.rs.

mod core;
mod distribute;
mod placement;
mod reconcile;
mod results;
mod settle;

pub use self::core::Ledger;
pub use placement::WagerRequest;
pub use results::{
    DistributionResult, LedgerError, Placement, ReconcileOutcome, RollbackResult,
    SettlementResult, SkipReason, TrueUp,
};
