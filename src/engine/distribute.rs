// 4.5 engine/distribute.rs: aggregate PnL summaries and the hierarchy commission ledger.
// never touches a wallet. every write is delete-then-recreate for one
// (client, event, family) key, so re-running converges to the same rows.

use super::core::Ledger;
use super::results::{DistributionResult, LedgerError};
use crate::config::HierarchyConfig;
use crate::events::{EventPayload, HierarchyDistributedEvent};
use crate::hierarchy::{
    ancestors, plan_distribution, DistributionKey, HierarchyPnlEntry, PnlSummary,
};
use crate::store::LedgerState;
use crate::types::Timestamp;
use rust_decimal::Decimal;
use tracing::debug;

impl Ledger {
    /// Rebuild the summary for `key` from settled wagers, then redistribute it.
    pub fn regenerate(&self, key: &DistributionKey) -> Result<DistributionResult, LedgerError> {
        let now = self.now();
        let hierarchy = self.config.hierarchy.clone();
        let result = self.store.transaction(|state| {
            let net_pnl = rebuild_summary(state, key, now);
            let entries = write_entries(state, key, net_pnl, &hierarchy, now)?;
            Ok(DistributionResult {
                key: key.clone(),
                net_pnl,
                entries,
            })
        })?;
        self.announce(&result);
        Ok(result)
    }

    /// Write the commission entries for an explicit net result. Idempotent per key.
    pub fn distribute_pnl(
        &self,
        key: &DistributionKey,
        net_pnl: Decimal,
    ) -> Result<DistributionResult, LedgerError> {
        let now = self.now();
        let hierarchy = self.config.hierarchy.clone();
        let result = self.store.transaction(|state| {
            let entries = write_entries(state, key, net_pnl, &hierarchy, now)?;
            Ok(DistributionResult {
                key: key.clone(),
                net_pnl,
                entries,
            })
        })?;
        self.announce(&result);
        Ok(result)
    }

    fn announce(&self, result: &DistributionResult) {
        debug!(
            user_id = %result.key.user_id,
            event_id = %result.key.event_id,
            family = %result.key.family,
            net_pnl = %result.net_pnl,
            entries = result.entries,
            "hierarchy entries regenerated"
        );
        self.publish(vec![EventPayload::HierarchyDistributed(HierarchyDistributedEvent {
            from_user: result.key.user_id,
            event_id: result.key.event_id.clone(),
            family: result.key.family,
            net_pnl: result.net_pnl,
            entries: result.entries,
        })]);
    }
}

/// Net settled PnL for the key. A key with nothing settled loses its summary.
fn rebuild_summary(state: &mut LedgerState, key: &DistributionKey, now: Timestamp) -> Decimal {
    let (net_pnl, settled_wagers) = state
        .wagers
        .for_user(key.user_id)
        .filter(|w| {
            w.event_id == key.event_id
                && w.family == key.family
                && w.status.is_settled()
        })
        .fold((Decimal::ZERO, 0usize), |(sum, n), w| {
            (sum + w.pnl.unwrap_or_default(), n + 1)
        });

    if settled_wagers == 0 {
        state.summaries.remove(key);
    } else {
        state.summaries.insert(
            key.clone(),
            PnlSummary {
                user_id: key.user_id,
                event_id: key.event_id.clone(),
                family: key.family,
                net_pnl,
                settled_wagers,
                updated_at: now,
            },
        );
    }
    net_pnl
}

fn write_entries(
    state: &mut LedgerState,
    key: &DistributionKey,
    net_pnl: Decimal,
    hierarchy: &HierarchyConfig,
    now: Timestamp,
) -> Result<usize, LedgerError> {
    state.hierarchy_entries.retain(|(from, _, event, family), _| {
        !(*from == key.user_id && *event == key.event_id && *family == key.family)
    });

    let client = state.account(key.user_id)?;
    let chain = ancestors(&state.accounts, key.user_id, hierarchy.max_depth)?;
    let plan = plan_distribution(client, &chain, net_pnl, hierarchy.amount_scale)?;

    let entries: Vec<HierarchyPnlEntry> = plan
        .into_iter()
        .map(|share| HierarchyPnlEntry {
            from_user: key.user_id,
            to_user: share.to_user,
            event_id: key.event_id.clone(),
            family: key.family,
            amount: share.amount,
            percentage: share.percentage,
            created_at: now,
        })
        .collect();

    let written = entries.len();
    for entry in entries {
        state.hierarchy_entries.insert(entry.key(), entry);
    }
    Ok(written)
}
