// wager-ledger: wallet exposure and settlement ledger for a P2P betting exchange.
// risk-first: a wager is only accepted once its worst-case loss is locked.
// all money is Decimal. the engine is synchronous; only the reconciliation pool is async.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: UserId, WagerId, EventId, MarketId, Side, Odds, Timestamp
//   1.1  market.rs: market catalog, family classification, settlement ids
//   1.2  wager.rs: wager record, terms, derive-if-absent amounts
//   2.x  wallet.rs: balance / liability / provisional lock arithmetic
//   3.x  exposure.rs: per-family worst-case exposure calculators (pure)
//   4.x  engine/: placement, reconciliation, settlement, rollback, distribution
//   5.x  hierarchy.rs: account tree, commission split planning
//   6.x  settlement.rs: declarations, win rules, settlement records
//   7.x  events.rs: committed state changes for audit and cache invalidation
//   8.x  config.rs: transaction budgets, worker pool, logging, env presets
//   8.1  store.rs: in-memory transactional store with bounded waits
//   9.x  worker.rs: tokio reconciliation pool

// core ledger modules
pub mod engine;
pub mod exposure;
pub mod market;
pub mod types;
pub mod wager;
pub mod wallet;

// settlement and distribution
pub mod hierarchy;
pub mod settlement;

// infrastructure
pub mod config;
pub mod events;
pub mod store;
pub mod worker;

// re exports for convenience
pub use config::{
    ConfigError, Environment, HierarchyConfig, LedgerConfig, LoggingConfig, ReconcileConfig,
    TransactionLimits,
};
pub use engine::*;
pub use events::{EventLog, EventPayload, EventSink, LedgerEvent, Sequence};
pub use hierarchy::{Account, DistributionKey, HierarchyError, HierarchyPnlEntry, PnlSummary, Role};
pub use market::{Market, MarketFamily, SettlementId};
pub use settlement::{Declaration, Operator, Settlement};
pub use store::TxPhase;
pub use types::*;
pub use wager::{ReconcileStage, Wager, WagerStatus, WagerTerms};
pub use wallet::{Wallet, WalletError};
pub use worker::{reconcile_channel, spawn_workers, sweep, ReconcileHandle, ReconcileScheduler};
