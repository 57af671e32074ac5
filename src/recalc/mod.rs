//! Asynchronous "rebuild this staff member's slots" requests.

mod channel;
mod generator;

pub use channel::{ChannelQueue, RecalcReceiver, run_worker};
pub use generator::{SlotGenerator, generate_slots};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::observability::RECALC_ENQUEUED_TOTAL;

/// Why a recalculation was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecalcTrigger {
    AppointmentCancelled { appointment_id: Ulid },
    AppointmentMoved { appointment_id: Ulid },
    AppointmentCreated { appointment_id: Ulid },
    /// A booking was refused because the slot's time is already taken.
    BookingConflict { slot_id: Ulid },
    BusyTimeCreated { busy_time_id: Ulid },
    BusyTimeUpdated { busy_time_id: Ulid },
    BusyTimeDeleted { busy_time_id: Ulid },
    WorkingHoursChanged,
    Scheduled,
    Manual,
}

impl RecalcTrigger {
    pub fn label(&self) -> &'static str {
        match self {
            RecalcTrigger::AppointmentCancelled { .. } => "appointment_cancelled",
            RecalcTrigger::AppointmentMoved { .. } => "appointment_moved",
            RecalcTrigger::AppointmentCreated { .. } => "appointment_created",
            RecalcTrigger::BookingConflict { .. } => "booking_conflict",
            RecalcTrigger::BusyTimeCreated { .. } => "busy_time_created",
            RecalcTrigger::BusyTimeUpdated { .. } => "busy_time_updated",
            RecalcTrigger::BusyTimeDeleted { .. } => "busy_time_deleted",
            RecalcTrigger::WorkingHoursChanged => "working_hours_changed",
            RecalcTrigger::Scheduled => "scheduled",
            RecalcTrigger::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalcRequest {
    pub tenant_id: String,
    pub staff_id: Ulid,
    pub trigger: RecalcTrigger,
}

impl RecalcRequest {
    pub fn new(tenant: &str, staff_id: Ulid, trigger: RecalcTrigger) -> Self {
        Self {
            tenant_id: tenant.to_string(),
            staff_id,
            trigger,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// A request for the same tenant and staff member was already waiting.
    Coalesced,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("recalculation queue is full")]
    Full,
    #[error("recalculation queue is closed")]
    Closed,
}

pub trait RecalcQueue: Send + Sync {
    /// Never blocks.
    fn enqueue(&self, request: RecalcRequest) -> Result<Enqueued, QueueError>;
}

/// Enqueue and swallow failures. Returns whether a run is now pending.
pub fn enqueue_best_effort(queue: &dyn RecalcQueue, request: RecalcRequest) -> bool {
    let (tenant, staff_id, reason) = (
        request.tenant_id.clone(),
        request.staff_id,
        request.trigger.label(),
    );
    match queue.enqueue(request) {
        Ok(Enqueued::Queued) => {
            metrics::counter!(RECALC_ENQUEUED_TOTAL, "outcome" => "queued").increment(1);
            debug!("recalculation queued for {tenant}/{staff_id} ({reason})");
            true
        }
        Ok(Enqueued::Coalesced) => {
            metrics::counter!(RECALC_ENQUEUED_TOTAL, "outcome" => "coalesced").increment(1);
            true
        }
        Err(e) => {
            metrics::counter!(RECALC_ENQUEUED_TOTAL, "outcome" => "rejected").increment(1);
            warn!("recalculation for {tenant}/{staff_id} ({reason}) not queued: {e}");
            false
        }
    }
}
