use std::collections::HashMap;

use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::MAX_SLOTS_PER_STAFF;
use crate::model::*;

use super::{SlotStore, StoreError, WalCommand};

/// Precondition of a single-row conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// Available, or held by a lapsed hold.
    Bookable,
    /// Held by this session and not yet expired.
    HeldBy(SessionId),
    /// Carries a hold that has lapsed.
    HoldExpired,
    /// Permanently unavailable with no hold fields.
    Booked,
}

impl Expect {
    fn holds(&self, slot: &AvailabilitySlot, now: Ms) -> bool {
        match self {
            Expect::Bookable => slot.is_bookable(now),
            Expect::HeldBy(session) => slot.is_held_by(session, now),
            Expect::HoldExpired => slot.hold_expired(now),
            Expect::Booked => slot.state(now) == SlotState::Booked,
        }
    }
}

/// What a regeneration did to a staff member's window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    /// Slots in the window after the write.
    pub total: usize,
    /// Held slots carried over untouched.
    pub kept_holds: usize,
    /// Generated slots that took over the id of an identical existing slot.
    pub reused_ids: usize,
    /// Generated slots dropped because they collide with a kept hold.
    pub skipped: usize,
}

fn would_change(slot: &AvailabilitySlot, write: &SlotWrite) -> bool {
    slot.clone().apply(write)
}

impl SlotStore {
    /// Replace every slot of `staff_id` starting inside `window` with `generated`.
    ///
    /// Slots with an active hold survive untouched and generated slots overlapping
    /// them are skipped. A generated slot with the same span as an existing one
    /// takes over its id.
    pub async fn replace_window(
        &self,
        staff_id: Ulid,
        window: Span,
        mut generated: Vec<AvailabilitySlot>,
        now: Ms,
    ) -> Result<ReplaceSummary, StoreError> {
        for slot in &generated {
            if slot.staff_id != staff_id {
                return Err(StoreError::Invalid("generated slot for another staff member"));
            }
            if slot.tenant_id != self.tenant_id() {
                return Err(StoreError::TenantMismatch {
                    slot_id: slot.id,
                    expected: self.tenant_id().to_string(),
                    actual: slot.tenant_id.clone(),
                });
            }
            if !window.contains_instant(slot.span.start) {
                return Err(StoreError::Invalid("generated slot starts outside window"));
            }
        }
        generated.sort_by_key(|s| s.span.start);

        let _gate = self.write_gate.read().await;
        let partition = self.partition_or_create(staff_id);
        let mut guard = partition.write().await;

        let existing = guard.starting_in(&window);
        let held: Vec<AvailabilitySlot> = existing
            .iter()
            .filter(|s| s.hold_active(now))
            .cloned()
            .collect();
        let mut ids_by_span: HashMap<Span, Ulid> = existing
            .iter()
            .filter(|s| !s.hold_active(now))
            .map(|s| (s.span, s.id))
            .collect();

        let mut summary = ReplaceSummary {
            kept_holds: held.len(),
            ..Default::default()
        };
        let mut next = held.clone();
        for mut slot in generated {
            if held.iter().any(|h| h.span.overlaps(&slot.span)) {
                summary.skipped += 1;
                continue;
            }
            if let Some(id) = ids_by_span.remove(&slot.span) {
                slot.id = id;
                summary.reused_ids += 1;
            }
            next.push(slot);
        }
        next.sort_by_key(|s| s.span.start);
        summary.total = next.len();

        let outside = guard.slots.len() - existing.len();
        if outside + next.len() > MAX_SLOTS_PER_STAFF {
            return Err(StoreError::LimitExceeded("too many slots for staff member"));
        }

        let event = Event::SlotsGenerated {
            staff_id,
            window,
            slots: next,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(summary)
    }

    /// Apply `write` to every slot of `staff_id` touching `range` (inclusive overlap).
    /// Returns only the slots whose stored state changed.
    pub async fn write_touching(
        &self,
        staff_id: Ulid,
        range: Span,
        write: SlotWrite,
    ) -> Result<Vec<AvailabilitySlot>, StoreError> {
        let _gate = self.write_gate.read().await;
        let Some(partition) = self.partition(&staff_id) else {
            return Ok(Vec::new());
        };
        let mut guard = partition.write().await;

        let slot_ids: Vec<Ulid> = guard
            .touching(&range)
            .filter(|s| would_change(s, &write))
            .map(|s| s.id)
            .collect();
        if slot_ids.is_empty() {
            return Ok(Vec::new());
        }

        let event = Event::SlotsWritten {
            staff_id,
            slot_ids: slot_ids.clone(),
            write,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(slot_ids
            .iter()
            .filter_map(|id| guard.get(id).cloned())
            .collect())
    }

    /// Single-row compare-and-set: apply `write` only if `expect` holds at `now`.
    pub async fn compare_and_set(
        &self,
        slot_id: Ulid,
        expect: Expect,
        write: SlotWrite,
        now: Ms,
    ) -> Result<AvailabilitySlot, StoreError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_slot_write(&slot_id).await?;
        let slot = guard.get(&slot_id).ok_or(StoreError::SlotNotFound(slot_id))?;

        if slot.tenant_id != self.tenant_id() {
            return Err(StoreError::TenantMismatch {
                slot_id,
                expected: self.tenant_id().to_string(),
                actual: slot.tenant_id.clone(),
            });
        }
        if !expect.holds(slot, now) {
            return Err(StoreError::PreconditionFailed {
                slot_id,
                state: slot.state(now),
            });
        }

        let event = Event::SlotsWritten {
            staff_id: guard.staff_id,
            slot_ids: vec![slot_id],
            write,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .get(&slot_id)
            .cloned()
            .ok_or(StoreError::SlotNotFound(slot_id))
    }

    /// Release every hold that lapsed at or before `now`. One WAL record per staff member.
    pub async fn release_expired_holds(&self, now: Ms) -> Result<Vec<Ulid>, StoreError> {
        let _gate = self.write_gate.read().await;
        let mut released = Vec::new();
        for partition in self.all_partitions() {
            let mut guard = partition.write().await;
            let slot_ids: Vec<Ulid> = guard
                .slots
                .iter()
                .filter(|s| s.hold_expired(now))
                .map(|s| s.id)
                .collect();
            if slot_ids.is_empty() {
                continue;
            }
            let event = Event::SlotsWritten {
                staff_id: guard.staff_id,
                slot_ids: slot_ids.clone(),
                write: SlotWrite::Release,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            released.extend(slot_ids);
        }
        Ok(released)
    }

    /// Rewrite the WAL with one `SlotsGenerated` record per staff member.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.write_gate.write().await;
        let mut events = Vec::new();
        for partition in self.all_partitions() {
            let guard = partition.read().await;
            let (Some(first), Some(last_end)) = (
                guard.slots.first(),
                guard.slots.iter().map(|s| s.span.end).max(),
            ) else {
                continue;
            };
            events.push(Event::SlotsGenerated {
                staff_id: guard.staff_id,
                window: Span::new(first.span.start, last_end),
                slots: guard.slots.clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
