use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::recalc::{RecalcQueue, RecalcRequest, RecalcTrigger, enqueue_best_effort};
use crate::schedule::WorkingHoursProvider;
use crate::slots::SlotManager;
use crate::store::SlotStore;
use crate::tenant::TenantManager;

/// Periodically reopen slots whose hold has lapsed, independent of customer traffic.
pub async fn run_hold_sweeper(manager: SlotManager, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        sweep_once(&manager).await;
    }
    debug!("hold sweeper for tenant {} stopped", manager.tenant_id());
}

/// One sweep pass. Returns how many holds were released.
pub async fn sweep_once(manager: &SlotManager) -> usize {
    match manager.release_expired_holds().await {
        Ok(released) => {
            for slot_id in &released {
                info!("released expired hold on slot {slot_id}");
            }
            released.len()
        }
        Err(e) => {
            warn!("hold sweep failed for tenant {}: {e}", manager.tenant_id());
            0
        }
    }
}

/// Rewrite the tenant's WAL once enough appends have piled up since the last rewrite.
pub async fn run_compactor(
    store: Arc<SlotStore>,
    threshold: u64,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact_wal().await {
            Ok(()) => info!(
                "compacted WAL for tenant {} after {appends} appends",
                store.tenant_id()
            ),
            Err(e) => warn!("WAL compaction failed for tenant {}: {e}", store.tenant_id()),
        }
    }
}

/// Queue a regeneration for every staff member with working hours, in every
/// open tenant. Heals whatever best-effort reconciliation missed.
pub async fn run_full_recalc(
    tenants: Arc<TenantManager>,
    hours: Arc<dyn WorkingHoursProvider>,
    queue: Arc<dyn RecalcQueue>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let queued = enqueue_all(&tenants, hours.as_ref(), queue.as_ref()).await;
        debug!("scheduled recalculation queued {queued} staff members");
    }
}

pub async fn enqueue_all(
    tenants: &TenantManager,
    hours: &dyn WorkingHoursProvider,
    queue: &dyn RecalcQueue,
) -> usize {
    let mut queued = 0;
    for tenant in tenants.tenant_ids() {
        let staff_ids = match hours.staff_ids(&tenant).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("scheduled recalculation skipped tenant {tenant}: {e}");
                continue;
            }
        };
        for staff_id in staff_ids {
            let request = RecalcRequest::new(&tenant, staff_id, RecalcTrigger::Scheduled);
            if enqueue_best_effort(queue, request) {
                queued += 1;
            }
        }
    }
    queued
}
