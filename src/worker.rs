// 9.0 worker.rs: the reconciliation pool. placement hands wager ids to a scheduler;
// tokio tasks drain them and call Ledger::reconcile off the async threads.
// jobs shard by wager id, so one wager is never reconciled on two tasks at once.

use crate::config::ReconcileConfig;
use crate::engine::{Ledger, LedgerError};
use crate::types::WagerId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outbound seam for fire-and-forget reconciliation. Must never block the caller.
pub trait ReconcileScheduler: Send + Sync {
    fn schedule(&self, wager_id: WagerId);
}

/// Sending half of the pool. Cheap to clone; every clone shares one pending set.
#[derive(Clone)]
pub struct ReconcileHandle {
    shards: Vec<mpsc::Sender<WagerId>>,
    pending: Arc<Mutex<HashSet<WagerId>>>,
}

/// Receiving half, consumed by `spawn_workers`.
pub struct ReconcileReceivers {
    shards: Vec<mpsc::Receiver<WagerId>>,
    pending: Arc<Mutex<HashSet<WagerId>>>,
    max_attempts: u32,
    retry_delay: std::time::Duration,
}

/// 9.1: one bounded queue per worker.
pub fn reconcile_channel(config: &ReconcileConfig) -> (ReconcileHandle, ReconcileReceivers) {
    let workers = config.workers.max(1);
    let capacity = config.queue_capacity.max(1);
    let pending = Arc::new(Mutex::new(HashSet::new()));

    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..workers).map(|_| mpsc::channel(capacity)).unzip();

    let handle = ReconcileHandle {
        shards: senders,
        pending: Arc::clone(&pending),
    };
    let receivers = ReconcileReceivers {
        shards: receivers,
        pending,
        max_attempts: config.max_attempts.max(1),
        retry_delay: config.retry_delay(),
    };
    (handle, receivers)
}

impl ReconcileHandle {
    fn shard_for(&self, wager_id: WagerId) -> usize {
        (wager_id.0 % self.shards.len() as u64) as usize
    }

    /// Jobs queued or running right now.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl ReconcileScheduler for ReconcileHandle {
    fn schedule(&self, wager_id: WagerId) {
        if !self.pending.lock().insert(wager_id) {
            debug!(wager_id = %wager_id, "reconciliation already queued");
            return;
        }
        let shard = self.shard_for(wager_id);
        if let Err(err) = self.shards[shard].try_send(wager_id) {
            self.pending.lock().remove(&wager_id);
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "workers stopped",
            };
            warn!(
                wager_id = %wager_id,
                shard,
                reason,
                "reconciliation not queued, wager left for the sweep"
            );
        }
    }
}

/// 9.2: one task per shard. Tasks exit once every handle is dropped.
pub fn spawn_workers(ledger: Arc<Ledger>, receivers: ReconcileReceivers) -> Vec<JoinHandle<()>> {
    let ReconcileReceivers {
        shards,
        pending,
        max_attempts,
        retry_delay,
    } = receivers;

    shards
        .into_iter()
        .enumerate()
        .map(|(shard, mut rx)| {
            let ledger = Arc::clone(&ledger);
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                while let Some(wager_id) = rx.recv().await {
                    run_job(&ledger, wager_id, max_attempts, retry_delay).await;
                    pending.lock().remove(&wager_id);
                }
                debug!(shard, "reconciliation worker stopped");
            })
        })
        .collect()
}

async fn run_job(
    ledger: &Arc<Ledger>,
    wager_id: WagerId,
    max_attempts: u32,
    retry_delay: std::time::Duration,
) {
    for attempt in 1..=max_attempts {
        let job = Arc::clone(ledger);
        let result = tokio::task::spawn_blocking(move || job.reconcile(wager_id)).await;

        let err = match result {
            Ok(Ok(_)) => return,
            Ok(Err(err)) => err,
            Err(join) => LedgerError::InvariantViolation(format!("reconcile task panicked: {join}")),
        };
        if attempt == max_attempts || !worth_retrying(&err) {
            error!(
                wager_id = %wager_id,
                attempts = attempt,
                error = %err,
                "reconciliation gave up, fast lock stays in place"
            );
            return;
        }
        debug!(wager_id = %wager_id, attempt, error = %err, "retrying reconciliation");
        tokio::time::sleep(retry_delay).await;
    }
}

fn worth_retrying(err: &LedgerError) -> bool {
    err.is_retryable() || matches!(err, LedgerError::InvariantViolation(_))
}

/// Requeue every open wager still on a fast-path lock. Returns how many were offered.
pub fn sweep(ledger: &Ledger, scheduler: &dyn ReconcileScheduler) -> Result<usize, LedgerError> {
    let ids = ledger.unreconciled_wagers()?;
    for id in &ids {
        scheduler.schedule(*id);
    }
    if !ids.is_empty() {
        info!(count = ids.len(), "swept unreconciled wagers");
    }
    Ok(ids.len())
}
