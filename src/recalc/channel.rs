use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::limits::MAX_RECALC_ATTEMPTS;
use crate::observability::RECALC_FAILURES_TOTAL;

use super::{Enqueued, QueueError, RecalcQueue, RecalcRequest, SlotGenerator};

type PendingKey = (String, Ulid);
type Pending = Arc<DashMap<PendingKey, ()>>;

/// In-process recalculation queue: a bounded channel plus the set of
/// `(tenant, staff)` keys already waiting in it.
pub struct ChannelQueue {
    tx: mpsc::Sender<RecalcRequest>,
    pending: Pending,
}

/// Consumer half of a `ChannelQueue`.
pub struct RecalcReceiver {
    rx: mpsc::Receiver<RecalcRequest>,
    pending: Pending,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, RecalcReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending: Pending = Arc::new(DashMap::new());
        (
            Self {
                tx,
                pending: pending.clone(),
            },
            RecalcReceiver { rx, pending },
        )
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl RecalcQueue for ChannelQueue {
    fn enqueue(&self, request: RecalcRequest) -> Result<Enqueued, QueueError> {
        match self.pending.entry((request.tenant_id.clone(), request.staff_id)) {
            Entry::Occupied(_) => Ok(Enqueued::Coalesced),
            Entry::Vacant(slot) => match self.tx.try_send(request) {
                Ok(()) => {
                    slot.insert(());
                    Ok(Enqueued::Queued)
                }
                Err(TrySendError::Full(_)) => Err(QueueError::Full),
                Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
            },
        }
    }
}

impl RecalcReceiver {
    /// Next request. Its key leaves the pending set first, so a change that
    /// lands while this run is in progress queues a fresh run.
    pub async fn recv(&mut self) -> Option<RecalcRequest> {
        let request = self.rx.recv().await?;
        self.pending
            .remove(&(request.tenant_id.clone(), request.staff_id));
        Some(request)
    }
}

/// Drain the queue, regenerating each requested staff member. A failed run is
/// retried with linear backoff up to `MAX_RECALC_ATTEMPTS` times, then dropped
/// and left to the scheduled full recalculation.
pub async fn run_worker(
    mut receiver: RecalcReceiver,
    generator: Arc<SlotGenerator>,
    backoff: Duration,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };

        let reason = request.trigger.label();
        let mut attempt = 1;
        loop {
            match generator
                .regenerate(&request.tenant_id, request.staff_id)
                .await
            {
                Ok(summary) => {
                    info!(
                        "regenerated {} slots for {}/{} ({reason}, {} holds kept)",
                        summary.total, request.tenant_id, request.staff_id, summary.kept_holds
                    );
                    break;
                }
                Err(e) if attempt < MAX_RECALC_ATTEMPTS => {
                    warn!(
                        "recalculation attempt {attempt} for {}/{} failed: {e}",
                        request.tenant_id, request.staff_id
                    );
                    tokio::time::sleep(backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    metrics::counter!(RECALC_FAILURES_TOTAL).increment(1);
                    error!(
                        "recalculation for {}/{} ({reason}) gave up after {attempt} attempts: {e}",
                        request.tenant_id, request.staff_id
                    );
                    break;
                }
            }
        }
    }
    info!("recalculation worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recalc::{RecalcTrigger, enqueue_best_effort};

    fn request(tenant: &str, staff: Ulid) -> RecalcRequest {
        RecalcRequest::new(tenant, staff, RecalcTrigger::Manual)
    }

    #[tokio::test]
    async fn duplicate_requests_coalesce() {
        let (queue, mut rx) = ChannelQueue::new(8);
        let staff = Ulid::new();
        assert_eq!(queue.enqueue(request("a", staff)), Ok(Enqueued::Queued));
        assert_eq!(queue.enqueue(request("a", staff)), Ok(Enqueued::Coalesced));
        assert_eq!(queue.enqueue(request("b", staff)), Ok(Enqueued::Queued));
        assert_eq!(queue.pending_len(), 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.tenant_id, "a");
        // Once the worker picked it up, the same key queues a fresh run.
        assert_eq!(queue.enqueue(request("a", staff)), Ok(Enqueued::Queued));
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let (queue, _rx) = ChannelQueue::new(1);
        assert!(queue.enqueue(request("a", Ulid::new())).is_ok());
        assert_eq!(queue.enqueue(request("a", Ulid::new())), Err(QueueError::Full));
        // A rejected request leaves no pending marker behind.
        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (queue, rx) = ChannelQueue::new(4);
        drop(rx);
        assert_eq!(queue.enqueue(request("a", Ulid::new())), Err(QueueError::Closed));
    }

    #[test]
    fn best_effort_swallows_failures() {
        let (queue, rx) = ChannelQueue::new(4);
        drop(rx);
        assert!(!enqueue_best_effort(&queue, request("a", Ulid::new())));
    }
}
