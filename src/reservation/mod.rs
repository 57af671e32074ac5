//! Checkout: hold a slot for a session, then turn the hold into an appointment.

mod booking;
mod session;

pub use booking::BookingRequest;
pub use session::ReservationSession;

use std::sync::Arc;

use ulid::Ulid;

use crate::error::SlotError;
use crate::model::SessionId;
use crate::recalc::RecalcQueue;
use crate::schedule::AppointmentStore;
use crate::slots::SlotManager;
use crate::tenant::TenantManager;

pub struct ReservationService {
    tenants: Arc<TenantManager>,
    appointments: Arc<dyn AppointmentStore>,
    queue: Arc<dyn RecalcQueue>,
}

impl ReservationService {
    pub fn new(
        tenants: Arc<TenantManager>,
        appointments: Arc<dyn AppointmentStore>,
        queue: Arc<dyn RecalcQueue>,
    ) -> Self {
        Self {
            tenants,
            appointments,
            queue,
        }
    }

    /// A tenant that was never opened has no slots to act on.
    fn manager(&self, tenant: &str, slot_id: Ulid) -> Result<SlotManager, SlotError> {
        self.tenants
            .existing_manager(tenant)
            .ok_or(SlotError::SlotNotFound(slot_id))
    }

    /// Hold `slot_id` for `session` for one hold TTL.
    pub async fn reserve(
        &self,
        tenant: &str,
        slot_id: Ulid,
        session: &SessionId,
    ) -> Result<ReservationSession, SlotError> {
        let slot = self
            .manager(tenant, slot_id)?
            .reserve_slot(slot_id, session, tenant)
            .await?;
        ReservationSession::from_slot(&slot)
            .ok_or_else(|| SlotError::invalid("reserved slot carries no hold"))
    }
}
