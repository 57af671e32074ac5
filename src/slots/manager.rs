use std::sync::Arc;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::error::SlotError;
use crate::model::*;
use crate::observability::{
    HOLDS_EXPIRED_TOTAL, SLOT_RESERVATIONS_TOTAL, SLOTS_INVALIDATED_TOTAL, SLOTS_RELEASED_TOTAL,
};
use crate::store::{Expect, SlotStore, StoreError};

use super::{utc_day, validate_range};

/// Slot operations for one tenant. Every write is a single store-level
/// conditional write; nothing here reads a row and then writes it back.
pub struct SlotManager {
    store: Arc<SlotStore>,
    clock: Arc<dyn Clock>,
    hold_ttl_ms: Ms,
}

impl SlotManager {
    pub fn new(store: Arc<SlotStore>, clock: Arc<dyn Clock>, hold_ttl_ms: Ms) -> Self {
        Self {
            store,
            clock,
            hold_ttl_ms,
        }
    }

    pub fn store(&self) -> &Arc<SlotStore> {
        &self.store
    }

    pub fn tenant_id(&self) -> &str {
        self.store.tenant_id()
    }

    pub fn hold_ttl_ms(&self) -> Ms {
        self.hold_ttl_ms
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    fn check_tenant(&self, tenant: &str) -> Result<(), SlotError> {
        if tenant != self.store.tenant_id() {
            return Err(SlotError::TenantMismatch {
                expected: self.store.tenant_id().to_string(),
                actual: tenant.to_string(),
            });
        }
        Ok(())
    }

    /// Make every slot touching `[start, end]` available again and drop its hold.
    /// Returns how many slots actually changed, so a repeat call returns 0.
    pub async fn release_slots(
        &self,
        staff_id: Ulid,
        start: Ms,
        end: Ms,
        tenant: &str,
    ) -> Result<usize, SlotError> {
        self.check_tenant(tenant)?;
        let range = validate_range(start, end)?;
        let changed = self
            .store
            .write_touching(staff_id, range, SlotWrite::Release)
            .await?;
        metrics::counter!(SLOTS_RELEASED_TOTAL).increment(changed.len() as u64);
        debug!(
            "released {} slots for staff {staff_id} in [{start}, {end}]",
            changed.len()
        );
        Ok(changed.len())
    }

    /// Close every slot touching `[start, end]`. With a session the slots are
    /// held for that session for one hold TTL; without one they are blocked.
    pub async fn invalidate_slots(
        &self,
        staff_id: Ulid,
        start: Ms,
        end: Ms,
        tenant: &str,
        session: Option<&SessionId>,
    ) -> Result<usize, SlotError> {
        self.check_tenant(tenant)?;
        let range = validate_range(start, end)?;
        let write = match session {
            Some(session) => SlotWrite::Hold {
                session: session.clone(),
                until: self.now() + self.hold_ttl_ms,
            },
            None => SlotWrite::Block,
        };
        let changed = self.store.write_touching(staff_id, range, write).await?;
        metrics::counter!(SLOTS_INVALIDATED_TOTAL).increment(changed.len() as u64);
        debug!(
            "invalidated {} slots for staff {staff_id} in [{start}, {end}]",
            changed.len()
        );
        Ok(changed.len())
    }

    /// Take a hold on one slot for `session`. Succeeds only if the slot is
    /// bookable at this instant; a lapsed hold counts as bookable.
    pub async fn reserve_slot(
        &self,
        slot_id: Ulid,
        session: &SessionId,
        tenant: &str,
    ) -> Result<AvailabilitySlot, SlotError> {
        self.check_tenant(tenant)?;
        let now = self.now();
        let write = SlotWrite::Hold {
            session: session.clone(),
            until: now + self.hold_ttl_ms,
        };
        match self
            .store
            .compare_and_set(slot_id, Expect::Bookable, write, now)
            .await
        {
            Ok(slot) => {
                metrics::counter!(SLOT_RESERVATIONS_TOTAL, "outcome" => "reserved").increment(1);
                info!("slot {slot_id} held by session {session} until {:?}", slot.reserved_until);
                Ok(slot)
            }
            Err(StoreError::PreconditionFailed { state, .. }) => {
                metrics::counter!(SLOT_RESERVATIONS_TOTAL, "outcome" => "conflict").increment(1);
                debug!("reserve of slot {slot_id} by {session} lost: slot is {state:?}");
                Err(SlotError::SlotAlreadyReserved(slot_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Turn `session`'s live hold into a permanent booking.
    pub async fn promote_hold(
        &self,
        slot_id: Ulid,
        session: &SessionId,
        tenant: &str,
    ) -> Result<AvailabilitySlot, SlotError> {
        self.check_tenant(tenant)?;
        let now = self.now();
        match self
            .store
            .compare_and_set(slot_id, Expect::HeldBy(session.clone()), SlotWrite::Block, now)
            .await
        {
            Ok(slot) => Ok(slot),
            Err(StoreError::PreconditionFailed { state, .. }) => {
                warn!("promotion of slot {slot_id} by {session} refused: slot is {state:?}");
                Err(SlotError::ReservationExpired(slot_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Undo a promotion whose appointment could not be written. Only a slot
    /// that is still booked is reopened.
    pub async fn revert_booking(&self, slot_id: Ulid, tenant: &str) -> Result<(), SlotError> {
        self.check_tenant(tenant)?;
        self.store
            .compare_and_set(slot_id, Expect::Booked, SlotWrite::Release, self.now())
            .await?;
        metrics::counter!(SLOTS_RELEASED_TOTAL).increment(1);
        Ok(())
    }

    /// Read-only: slots touching `[start, end]`.
    pub async fn find_overlapping_slots(
        &self,
        staff_id: Ulid,
        start: Ms,
        end: Ms,
        tenant: &str,
    ) -> Result<Vec<AvailabilitySlot>, SlotError> {
        self.check_tenant(tenant)?;
        let range = validate_range(start, end)?;
        Ok(self.store.touching_slots(&staff_id, &range).await)
    }

    /// Classify the slots starting on the UTC day containing `date`.
    pub async fn get_slot_stats(
        &self,
        staff_id: Ulid,
        date: Ms,
        tenant: &str,
    ) -> Result<SlotStats, SlotError> {
        self.check_tenant(tenant)?;
        let day = validate_range(date, date.saturating_add(1)).map(|_| utc_day(date))?;
        let now = self.now();
        let mut stats = SlotStats::default();
        for slot in self.store.slots_starting_in(Some(&staff_id), &day).await {
            stats.record(slot.state(now));
        }
        Ok(stats)
    }

    pub async fn get_slot(&self, slot_id: Ulid, tenant: &str) -> Result<AvailabilitySlot, SlotError> {
        self.check_tenant(tenant)?;
        self.store
            .get_slot(&slot_id)
            .await
            .ok_or(SlotError::SlotNotFound(slot_id))
    }

    /// Eager sweep: reopen every slot whose hold has lapsed.
    pub async fn release_expired_holds(&self) -> Result<Vec<Ulid>, SlotError> {
        let released = self.store.release_expired_holds(self.now()).await?;
        if !released.is_empty() {
            metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(released.len() as u64);
        }
        Ok(released)
    }
}
