// 7.0: every committed state change produces an event. used for the audit trail and to
// tell caches/notifiers that a user's positions or exposure moved. events are advisory:
// consumers re-read the ledger, they never treat an event as the source of truth.

use crate::market::{MarketFamily, SettlementId};
use crate::settlement::Declaration;
use crate::types::{EventId, MarketId, Side, Timestamp, UserId, WagerId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sequence(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub seq: Sequence,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    WagerAccepted(WagerAcceptedEvent),
    WagerReconciled(WagerReconciledEvent),
    ExposureChanged(ExposureChangedEvent),
    MarketSettled(MarketSettledEvent),
    SettlementRolledBack(SettlementRolledBackEvent),
    HierarchyDistributed(HierarchyDistributedEvent),
}

impl EventPayload {
    /// Users whose positions this event concerns.
    pub fn users(&self) -> Vec<UserId> {
        match self {
            EventPayload::WagerAccepted(e) => vec![e.user_id],
            EventPayload::WagerReconciled(e) => vec![e.user_id],
            EventPayload::ExposureChanged(e) => vec![e.user_id],
            EventPayload::MarketSettled(e) => e.users.clone(),
            EventPayload::SettlementRolledBack(e) => e.users.clone(),
            EventPayload::HierarchyDistributed(e) => vec![e.from_user],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerAcceptedEvent {
    pub wager_id: WagerId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub market_id: MarketId,
    pub side: Side,
    pub stake: Decimal,
    pub fast_lock: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerReconciledEvent {
    pub wager_id: WagerId,
    pub user_id: UserId,
    pub fast_lock: Decimal,
    pub exact_lock: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureChangedEvent {
    pub user_id: UserId,
    pub balance: Decimal,
    pub liability: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSettledEvent {
    pub settlement_id: SettlementId,
    pub declaration: Declaration,
    pub wagers_settled: usize,
    pub users: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRolledBackEvent {
    pub settlement_id: SettlementId,
    pub wagers_reverted: usize,
    pub users: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyDistributedEvent {
    pub from_user: UserId,
    pub event_id: EventId,
    pub family: MarketFamily,
    pub net_pnl: Decimal,
    pub entries: usize,
}

/// External consumer of committed events (cache invalidation, notifications).
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &LedgerEvent);
}

/// Bounded in-memory audit trail. Oldest events fall off first.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<LedgerEvent>,
    next_seq: u64,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_seq: 1,
            capacity,
        }
    }

    pub fn record(&mut self, timestamp: Timestamp, payload: EventPayload) -> LedgerEvent {
        let event = LedgerEvent {
            seq: Sequence(self.next_seq),
            timestamp,
            payload,
        };
        self.next_seq += 1;
        self.events.push_back(event.clone());
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
        event
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn recent(&self, count: usize) -> Vec<LedgerEvent> {
        let start = self.events.len().saturating_sub(count);
        self.events.iter().skip(start).cloned().collect()
    }

    pub fn all(&self) -> Vec<LedgerEvent> {
        self.events.iter().cloned().collect()
    }

    /// Retained events that concern `user`, oldest first.
    pub fn for_user(&self, user: UserId) -> Vec<LedgerEvent> {
        self.events
            .iter()
            .filter(|e| e.payload.users().contains(&user))
            .cloned()
            .collect()
    }
}
