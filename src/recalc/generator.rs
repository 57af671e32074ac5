use std::sync::Arc;

use tracing::debug;
use ulid::Ulid;

use crate::clock::Clock;
use crate::error::SlotError;
use crate::intervals::{chop, normalize, subtract_intervals};
use crate::limits::{DAY_MS, MAX_GENERATION_HORIZON_MS, MIN_SLOT_LEN_MS};
use crate::model::*;
use crate::observability::RECALC_DURATION_SECONDS;
use crate::schedule::{Appointment, AppointmentStore, BusyTimeProvider, WorkingHoursBlock, WorkingHoursProvider};
use crate::slots::utc_day;
use crate::store::ReplaceSummary;
use crate::tenant::TenantManager;

/// Build a staff member's slot set for `window`.
///
/// Working hours minus the merged busy times and confirmed appointments are cut
/// into back-to-back `slot_len` pieces (shorter remainders are dropped).
/// Overlapping blocks never yield two slots for the same instant. Every
/// confirmed appointment starting inside the window becomes one booked row, so
/// the booked intervals equal the appointment intervals.
pub fn generate_slots(
    tenant: &str,
    staff_id: Ulid,
    window: Span,
    blocks: &[WorkingHoursBlock],
    busy: &[Span],
    appointments: &[Appointment],
    slot_len: Ms,
) -> Vec<AvailabilitySlot> {
    let blockers: Vec<Span> = busy
        .iter()
        .copied()
        .chain(appointments.iter().map(|a| a.span))
        .collect();
    let blockers = normalize(&blockers);

    let mut ordered: Vec<&WorkingHoursBlock> = blocks.iter().collect();
    ordered.sort_by_key(|b| b.span.start);
    let mut covered: Vec<Span> = Vec::new();

    let mut slots = Vec::new();
    for block in ordered {
        // An instant is offered at most once, by the earliest block covering it.
        let own = subtract_intervals(&[block.span], &normalize(&covered));
        covered.push(block.span);
        for free in subtract_intervals(&own, &blockers) {
            for span in chop(&free, slot_len) {
                if !window.contains_instant(span.start) {
                    continue;
                }
                slots.push(AvailabilitySlot {
                    id: Ulid::new(),
                    tenant_id: tenant.to_string(),
                    staff_id,
                    span,
                    location_id: block.location_id,
                    category: block.category.clone(),
                    is_available: true,
                    reserved_until: None,
                    reserved_by_session: None,
                });
            }
        }
    }

    for appointment in appointments {
        if !appointment.is_confirmed() || !window.contains_instant(appointment.span.start) {
            continue;
        }
        slots.push(AvailabilitySlot {
            id: Ulid::new(),
            tenant_id: tenant.to_string(),
            staff_id,
            span: appointment.span,
            location_id: None,
            category: Some(appointment.category.clone()),
            is_available: false,
            reserved_until: None,
            reserved_by_session: None,
        });
    }

    slots.sort_by_key(|s| s.span.start);
    slots
}

/// Consumer side of the recalculation queue: rebuilds one staff member's slots
/// from today's UTC midnight to the end of the rolling horizon.
pub struct SlotGenerator {
    tenants: Arc<TenantManager>,
    appointments: Arc<dyn AppointmentStore>,
    hours: Arc<dyn WorkingHoursProvider>,
    busy: Arc<dyn BusyTimeProvider>,
    clock: Arc<dyn Clock>,
    slot_len_ms: Ms,
    horizon_ms: Ms,
}

impl SlotGenerator {
    pub fn new(
        tenants: Arc<TenantManager>,
        appointments: Arc<dyn AppointmentStore>,
        hours: Arc<dyn WorkingHoursProvider>,
        busy: Arc<dyn BusyTimeProvider>,
        slot_len_ms: Ms,
        horizon_ms: Ms,
    ) -> Self {
        let clock = tenants.clock().clone();
        let slot_len_ms = slot_len_ms.clamp(MIN_SLOT_LEN_MS, DAY_MS);
        Self {
            tenants,
            appointments,
            hours,
            busy,
            clock,
            slot_len_ms,
            horizon_ms: horizon_ms.clamp(slot_len_ms, MAX_GENERATION_HORIZON_MS),
        }
    }

    pub fn window(&self, now: Ms) -> Span {
        let start = utc_day(now).start;
        Span::new(start, start + self.horizon_ms)
    }

    pub async fn regenerate(&self, tenant: &str, staff_id: Ulid) -> Result<ReplaceSummary, SlotError> {
        let started = std::time::Instant::now();
        let now = self.clock.now_ms();
        let window = self.window(now);

        let blocks = self.hours.blocks(tenant, staff_id, window).await?;
        let busy = self.busy.busy_times(tenant, staff_id, window).await?;
        let appointments = self
            .appointments
            .confirmed_for_staff(tenant, staff_id, window)
            .await?;
        let slots = generate_slots(
            tenant,
            staff_id,
            window,
            &blocks,
            &busy,
            &appointments,
            self.slot_len_ms,
        );
        debug!(
            "generated {} slots for {tenant}/{staff_id} from {} blocks, {} busy, {} appointments",
            slots.len(),
            blocks.len(),
            busy.len(),
            appointments.len()
        );

        let store = self.tenants.get_or_create(tenant)?;
        let summary = store.replace_window(staff_id, window, slots, now).await?;
        metrics::histogram!(RECALC_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(summary)
    }
}
