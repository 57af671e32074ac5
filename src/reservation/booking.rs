use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::error::{ReconciliationFailure, SlotError};
use crate::limits::{MAX_CATEGORY_LEN, MAX_NOTES_LEN};
use crate::model::SessionId;
use crate::observability::{BOOKINGS_TOTAL, RECONCILIATION_FAILURES_TOTAL};
use crate::recalc::{RecalcRequest, RecalcTrigger, enqueue_best_effort};
use crate::schedule::{Appointment, AppointmentType, NewAppointment, ScheduleError};

use super::ReservationService;

/// Checkout details submitted while holding a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub tenant: String,
    pub slot_id: Ulid,
    pub session_id: SessionId,
    pub appointment_type: AppointmentType,
    pub category: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl BookingRequest {
    fn validate(&self) -> Result<(), SlotError> {
        if self.category.trim().is_empty() || self.category.len() > MAX_CATEGORY_LEN {
            return Err(SlotError::invalid(format!(
                "category must be 1..={MAX_CATEGORY_LEN} bytes"
            )));
        }
        if self.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(SlotError::invalid(format!("notes exceed {MAX_NOTES_LEN} bytes")));
        }
        Ok(())
    }
}

impl ReservationService {
    /// Promote `request.session_id`'s hold on the slot and record the
    /// appointment.
    ///
    /// The promotion is a single conditional write keyed on the session, so a
    /// stale or foreign session fails with `ReservationExpired` before any
    /// appointment exists. If the appointment store refuses the booking because
    /// the time is already taken, the slot stays closed; any other refusal
    /// reopens it. Either way the store's error is returned.
    pub async fn confirm_booking(&self, request: BookingRequest) -> Result<Appointment, SlotError> {
        request.validate()?;
        let tenant = request.tenant.as_str();
        let slot_id = request.slot_id;
        let manager = self.manager(tenant, slot_id)?;

        let slot = match manager.promote_hold(slot_id, &request.session_id, tenant).await {
            Ok(slot) => slot,
            Err(e) => {
                let outcome = match e {
                    SlotError::ReservationExpired(_) => "expired",
                    _ => "failed",
                };
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
                return Err(e);
            }
        };

        let created = self
            .appointments
            .create(NewAppointment {
                tenant_id: tenant.to_string(),
                staff_id: slot.staff_id,
                slot_id: Some(slot_id),
                span: slot.span,
                appointment_type: request.appointment_type,
                category: request.category,
                notes: request.notes,
            })
            .await;

        let appointment = match created {
            Ok(appointment) => appointment,
            Err(e @ (ScheduleError::DuplicateSlot(_) | ScheduleError::Overlap(_))) => {
                // The time belongs to a confirmed appointment: the slot stays
                // closed and the recalculation rebuilds it as booked.
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => "conflict").increment(1);
                warn!("booking on slot {slot_id} of {tenant} refused: {e}");
                enqueue_best_effort(
                    self.queue.as_ref(),
                    RecalcRequest::new(tenant, slot.staff_id, RecalcTrigger::BookingConflict { slot_id }),
                );
                return Err(SlotError::Appointments(e));
            }
            Err(e) => {
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => "failed").increment(1);
                warn!("appointment for slot {slot_id} not created, reopening slot: {e}");
                if let Err(revert) = manager.revert_booking(slot_id, tenant).await {
                    let failure =
                        ReconciliationFailure::new("compensate_booking", slot.staff_id, &revert);
                    metrics::counter!(RECONCILIATION_FAILURES_TOTAL, "step" => failure.step)
                        .increment(1);
                    error!(
                        "slot {slot_id} of {tenant}/{} stays booked without an appointment: {}",
                        failure.staff_id, failure.message
                    );
                }
                return Err(SlotError::Appointments(e));
            }
        };

        metrics::counter!(BOOKINGS_TOTAL, "outcome" => "booked").increment(1);
        info!(
            "appointment {} booked on slot {slot_id} for staff {}",
            appointment.id, appointment.staff_id
        );
        enqueue_best_effort(
            self.queue.as_ref(),
            RecalcRequest::new(
                tenant,
                appointment.staff_id,
                RecalcTrigger::AppointmentCreated {
                    appointment_id: appointment.id,
                },
            ),
        );
        Ok(appointment)
    }
}
