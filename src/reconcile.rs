//! Keeping slots in step with the schedule.
//!
//! Every change to an appointment, an external busy time or a staff member's
//! working hours is followed by a release and/or invalidate over the affected
//! range and a recalculation request. Those follow-up steps never fail the
//! change that triggered them: a failed step is logged, counted and reported
//! in the returned [`ReconcileOutcome`], and the next recalculation heals it.

use std::sync::Arc;

use serde::Serialize;
use tracing::error;
use ulid::Ulid;

use crate::error::{ReconciliationFailure, SlotError};
use crate::model::{Ms, Span};
use crate::observability::RECONCILIATION_FAILURES_TOTAL;
use crate::recalc::{RecalcQueue, RecalcRequest, RecalcTrigger, enqueue_best_effort};
use crate::schedule::{Appointment, AppointmentStore, NewAppointment};
use crate::slots::{SlotManager, validate_range};
use crate::tenant::TenantManager;

/// What the follow-up steps of one schedule change did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub released: usize,
    pub invalidated: usize,
    pub recalc_queued: bool,
    pub failures: Vec<ReconciliationFailure>,
}

impl ReconcileOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, tenant: &str, failure: ReconciliationFailure) {
        metrics::counter!(RECONCILIATION_FAILURES_TOTAL, "step" => failure.step).increment(1);
        error!(
            "reconciliation step {} failed for {tenant}/{}: {}",
            failure.step, failure.staff_id, failure.message
        );
        self.failures.push(failure);
    }
}

pub struct ScheduleReconciler {
    tenants: Arc<TenantManager>,
    appointments: Arc<dyn AppointmentStore>,
    queue: Arc<dyn RecalcQueue>,
}

impl ScheduleReconciler {
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

    // ── Flows: primary write, then reconciliation ────────────────

    /// Cancel an appointment and reopen its time.
    pub async fn cancel_appointment(
        &self,
        tenant: &str,
        appointment_id: Ulid,
    ) -> Result<(Appointment, ReconcileOutcome), SlotError> {
        let cancelled = self.appointments.cancel(tenant, appointment_id).await?;
        let outcome = self.appointment_cancelled(tenant, &cancelled).await;
        Ok((cancelled, outcome))
    }

    /// Move an appointment to `[start, end)`, reopening the old time and
    /// closing the new one.
    pub async fn move_appointment(
        &self,
        tenant: &str,
        appointment_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<(Appointment, ReconcileOutcome), SlotError> {
        let to = validate_range(start, end)?;
        let (vacated, moved) = self
            .appointments
            .reschedule(tenant, appointment_id, to)
            .await?;
        let outcome = self.appointment_moved(tenant, &moved, vacated).await;
        Ok((moved, outcome))
    }

    /// Record an appointment made outside the checkout flow, such as one
    /// entered by office staff, and close its time.
    pub async fn create_appointment(
        &self,
        new: NewAppointment,
    ) -> Result<(Appointment, ReconcileOutcome), SlotError> {
        validate_range(new.span.start, new.span.end)?;
        let tenant = new.tenant_id.clone();
        // Opening the tenant first surfaces a bad tenant name before anything is written.
        self.tenants.get_or_create(&tenant)?;
        let created = self.appointments.create(new).await?;
        let outcome = self.appointment_created(&tenant, &created).await;
        Ok((created, outcome))
    }

    // ── Reactions ────────────────────────────────────────────────

    pub async fn appointment_cancelled(&self, tenant: &str, appointment: &Appointment) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        self.release(tenant, appointment.staff_id, appointment.span, &mut outcome)
            .await;
        self.enqueue(
            tenant,
            appointment.staff_id,
            RecalcTrigger::AppointmentCancelled {
                appointment_id: appointment.id,
            },
            &mut outcome,
        );
        outcome
    }

    /// `appointment` already carries its new time; `vacated` is the old one.
    /// The release and the invalidate are separate writes; a failure between
    /// them leaves partial state for the recalculation to heal.
    pub async fn appointment_moved(
        &self,
        tenant: &str,
        appointment: &Appointment,
        vacated: Span,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        self.release(tenant, appointment.staff_id, vacated, &mut outcome)
            .await;
        self.invalidate(tenant, appointment.staff_id, appointment.span, &mut outcome)
            .await;
        self.enqueue(
            tenant,
            appointment.staff_id,
            RecalcTrigger::AppointmentMoved {
                appointment_id: appointment.id,
            },
            &mut outcome,
        );
        outcome
    }

    pub async fn appointment_created(&self, tenant: &str, appointment: &Appointment) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        self.invalidate(tenant, appointment.staff_id, appointment.span, &mut outcome)
            .await;
        self.enqueue(
            tenant,
            appointment.staff_id,
            RecalcTrigger::AppointmentCreated {
                appointment_id: appointment.id,
            },
            &mut outcome,
        );
        outcome
    }

    pub async fn busy_time_added(
        &self,
        tenant: &str,
        staff_id: Ulid,
        busy_time_id: Ulid,
        span: Span,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        self.invalidate(tenant, staff_id, span, &mut outcome).await;
        self.enqueue(
            tenant,
            staff_id,
            RecalcTrigger::BusyTimeCreated { busy_time_id },
            &mut outcome,
        );
        outcome
    }

    pub async fn busy_time_updated(
        &self,
        tenant: &str,
        staff_id: Ulid,
        busy_time_id: Ulid,
        old: Span,
        new: Span,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        self.release(tenant, staff_id, old, &mut outcome).await;
        self.invalidate(tenant, staff_id, new, &mut outcome).await;
        self.enqueue(
            tenant,
            staff_id,
            RecalcTrigger::BusyTimeUpdated { busy_time_id },
            &mut outcome,
        );
        outcome
    }

    pub async fn busy_time_removed(
        &self,
        tenant: &str,
        staff_id: Ulid,
        busy_time_id: Ulid,
        span: Span,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        self.release(tenant, staff_id, span, &mut outcome).await;
        self.enqueue(
            tenant,
            staff_id,
            RecalcTrigger::BusyTimeDeleted { busy_time_id },
            &mut outcome,
        );
        outcome
    }

    /// Working hours only change what gets generated, so the recalculation
    /// does all the work.
    pub fn working_hours_changed(&self, tenant: &str, staff_id: Ulid) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        self.enqueue(tenant, staff_id, RecalcTrigger::WorkingHoursChanged, &mut outcome);
        outcome
    }

    // ── Steps ────────────────────────────────────────────────────

    fn manager(
        &self,
        tenant: &str,
        staff_id: Ulid,
        step: &'static str,
        outcome: &mut ReconcileOutcome,
    ) -> Option<SlotManager> {
        match self.tenants.slot_manager(tenant) {
            Ok(manager) => Some(manager),
            Err(e) => {
                outcome.fail(tenant, ReconciliationFailure::new(step, staff_id, e));
                None
            }
        }
    }

    async fn release(&self, tenant: &str, staff_id: Ulid, span: Span, outcome: &mut ReconcileOutcome) {
        let Some(manager) = self.manager(tenant, staff_id, "release", outcome) else {
            return;
        };
        match manager.release_slots(staff_id, span.start, span.end, tenant).await {
            Ok(n) => outcome.released += n,
            Err(e) => outcome.fail(tenant, ReconciliationFailure::new("release", staff_id, e)),
        }
    }

    async fn invalidate(&self, tenant: &str, staff_id: Ulid, span: Span, outcome: &mut ReconcileOutcome) {
        let Some(manager) = self.manager(tenant, staff_id, "invalidate", outcome) else {
            return;
        };
        match manager
            .invalidate_slots(staff_id, span.start, span.end, tenant, None)
            .await
        {
            Ok(n) => outcome.invalidated += n,
            Err(e) => outcome.fail(tenant, ReconciliationFailure::new("invalidate", staff_id, e)),
        }
    }

    fn enqueue(&self, tenant: &str, staff_id: Ulid, trigger: RecalcTrigger, outcome: &mut ReconcileOutcome) {
        let request = RecalcRequest::new(tenant, staff_id, trigger);
        outcome.recalc_queued = enqueue_best_effort(self.queue.as_ref(), request);
        if !outcome.recalc_queued {
            outcome.fail(
                tenant,
                ReconciliationFailure::new("enqueue", staff_id, "recalculation queue rejected the request"),
            );
        }
    }
}
