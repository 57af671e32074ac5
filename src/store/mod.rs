//! Per-tenant slot table.
//!
//! Slots live in memory, partitioned by staff member; each partition sits behind
//! its own `RwLock`. Every write is evaluated and applied while holding the
//! partition's write lock, and is appended to the tenant's WAL before the lock is
//! released, so a conditional write is a single atomic compare-and-set.

mod error;
mod mutations;
mod queries;

pub use error::StoreError;
pub use mutations::{Expect, ReplaceSummary};

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedStaffSlots = Arc<RwLock<StaffSlots>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that arrive while a flush is being prepared are folded
/// into the same fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes do not leak into
    // the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Apply an event to a staff partition (no locking, the caller holds the lock).
pub(super) fn apply_event(ss: &mut StaffSlots, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SlotsGenerated { window, slots, .. } => {
            for old in ss.drain_window(window) {
                index.remove(&old.id);
            }
            for slot in slots {
                index.insert(slot.id, ss.staff_id);
                ss.insert_slot(slot.clone());
            }
        }
        Event::SlotsWritten { slot_ids, write, .. } => {
            for id in slot_ids {
                if let Some(slot) = ss.get_mut(id) {
                    slot.apply(write);
                }
            }
        }
    }
}

pub struct SlotStore {
    tenant_id: String,
    pub(super) partitions: DashMap<Ulid, SharedStaffSlots>,
    /// Reverse lookup: slot id → staff id.
    pub(super) slot_index: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold this shared before taking any partition lock; compaction holds
    /// it exclusively so no append can land between its snapshot and the rewrite.
    pub(super) write_gate: RwLock<()>,
}

impl SlotStore {
    /// Replay the tenant's WAL and start its writer task. Must run inside a tokio runtime.
    pub fn open(tenant_id: impl Into<String>, wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let slot_index = DashMap::new();
        let mut replayed: HashMap<Ulid, StaffSlots> = HashMap::new();
        for event in &events {
            let staff_id = event.staff_id();
            let ss = replayed
                .entry(staff_id)
                .or_insert_with(|| StaffSlots::new(staff_id));
            apply_event(ss, event, &slot_index);
        }

        let partitions = DashMap::new();
        for (staff_id, ss) in replayed {
            partitions.insert(staff_id, Arc::new(RwLock::new(ss)));
        }

        Ok(Self {
            tenant_id: tenant_id.into(),
            partitions,
            slot_index,
            wal_tx,
            write_gate: RwLock::new(()),
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub(super) fn partition(&self, staff_id: &Ulid) -> Option<SharedStaffSlots> {
        self.partitions.get(staff_id).map(|e| e.value().clone())
    }

    pub(super) fn partition_or_create(&self, staff_id: Ulid) -> SharedStaffSlots {
        self.partitions
            .entry(staff_id)
            .or_insert_with(|| Arc::new(RwLock::new(StaffSlots::new(staff_id))))
            .value()
            .clone()
    }

    /// Snapshot of every partition handle, so no map guard is held across an await.
    pub(super) fn all_partitions(&self) -> Vec<SharedStaffSlots> {
        self.partitions.iter().map(|e| e.value().clone()).collect()
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut StaffSlots,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_event(ss, event, &self.slot_index);
        Ok(())
    }

    /// Lookup slot → staff, acquire that partition's write lock.
    pub(super) async fn resolve_slot_write(
        &self,
        slot_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<StaffSlots>, StoreError> {
        let staff_id = self
            .slot_index
            .get(slot_id)
            .map(|e| *e.value())
            .ok_or(StoreError::SlotNotFound(*slot_id))?;
        let partition = self
            .partition(&staff_id)
            .ok_or(StoreError::SlotNotFound(*slot_id))?;
        Ok(partition.write_owned().await)
    }
}
