use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::intervals::clamp;
use crate::limits::{DAY_MS, MAX_CATEGORY_LEN, MAX_NOTES_LEN, MINUTE_MS};
use crate::model::Span;
use crate::slots::utc_day;

use super::*;

// ── Appointments ─────────────────────────────────────────────────

/// Process-local appointment book.
#[derive(Debug, Default)]
pub struct InMemoryAppointments {
    appointments: DashMap<Ulid, Appointment>,
    /// slot id → id of the confirmed appointment it backs.
    slot_claims: DashMap<Ulid, Ulid>,
    /// Confirmed spans per staff member. Holding an entry's guard serialises
    /// every confirmed write for that staff member.
    books: DashMap<StaffKey, Vec<(Ulid, Span)>>,
}

impl InMemoryAppointments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    /// Confirmed appointments backed by `slot_id`.
    pub fn confirmed_for_slot(&self, slot_id: Ulid) -> usize {
        self.appointments
            .iter()
            .filter(|a| a.slot_id == Some(slot_id) && a.is_confirmed())
            .count()
    }
}

fn validate(new: &NewAppointment) -> Result<(), ScheduleError> {
    if new.span.start >= new.span.end {
        return Err(ScheduleError::Invalid("start must be before end".into()));
    }
    if new.category.trim().is_empty() || new.category.len() > MAX_CATEGORY_LEN {
        return Err(ScheduleError::Invalid("category must be 1..=32 bytes".into()));
    }
    if new.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(ScheduleError::Invalid(format!(
            "notes exceed {MAX_NOTES_LEN} bytes"
        )));
    }
    Ok(())
}

#[async_trait]
impl AppointmentStore for InMemoryAppointments {
    async fn create(&self, new: NewAppointment) -> Result<Appointment, ScheduleError> {
        validate(&new)?;
        let id = Ulid::new();
        let mut book = self
            .books
            .entry((new.tenant_id.clone(), new.staff_id))
            .or_default();
        let overlap = book
            .iter()
            .find(|(_, span)| span.overlaps(&new.span))
            .map(|(other, _)| *other);
        if let Some(slot_id) = new.slot_id {
            match self.slot_claims.entry(slot_id) {
                Entry::Occupied(_) => return Err(ScheduleError::DuplicateSlot(slot_id)),
                Entry::Vacant(v) => {
                    if let Some(other) = overlap {
                        return Err(ScheduleError::Overlap(other));
                    }
                    v.insert(id);
                }
            }
        } else if let Some(other) = overlap {
            return Err(ScheduleError::Overlap(other));
        }
        book.push((id, new.span));
        let appointment = Appointment {
            id,
            tenant_id: new.tenant_id,
            staff_id: new.staff_id,
            slot_id: new.slot_id,
            span: new.span,
            appointment_type: new.appointment_type,
            category: new.category,
            notes: new.notes,
            status: AppointmentStatus::Confirmed,
        };
        self.appointments.insert(id, appointment.clone());
        Ok(appointment)
    }

    async fn get(&self, tenant: &str, id: Ulid) -> Result<Appointment, ScheduleError> {
        self.appointments
            .get(&id)
            .filter(|a| a.tenant_id == tenant)
            .map(|a| a.value().clone())
            .ok_or(ScheduleError::NotFound(id))
    }

    async fn cancel(&self, tenant: &str, id: Ulid) -> Result<Appointment, ScheduleError> {
        let cancelled = {
            let mut entry = self
                .appointments
                .get_mut(&id)
                .filter(|a| a.tenant_id == tenant)
                .ok_or(ScheduleError::NotFound(id))?;
            if !entry.is_confirmed() {
                return Err(ScheduleError::Cancelled(id));
            }
            entry.status = AppointmentStatus::Cancelled;
            entry.value().clone()
        };
        if let Some(slot_id) = cancelled.slot_id {
            self.slot_claims.remove_if(&slot_id, |_, owner| *owner == id);
        }
        if let Some(mut book) = self.books.get_mut(&(tenant.to_string(), cancelled.staff_id)) {
            book.retain(|(owner, _)| *owner != id);
        }
        Ok(cancelled)
    }

    async fn reschedule(
        &self,
        tenant: &str,
        id: Ulid,
        to: Span,
    ) -> Result<(Span, Appointment), ScheduleError> {
        if to.start >= to.end {
            return Err(ScheduleError::Invalid("start must be before end".into()));
        }
        let staff_id = self
            .appointments
            .get(&id)
            .filter(|a| a.tenant_id == tenant)
            .map(|a| a.staff_id)
            .ok_or(ScheduleError::NotFound(id))?;
        let mut book = self.books.entry((tenant.to_string(), staff_id)).or_default();
        if let Some((other, _)) = book
            .iter()
            .find(|(owner, span)| *owner != id && span.overlaps(&to))
        {
            return Err(ScheduleError::Overlap(*other));
        }
        let (vacated, old_slot, moved) = {
            let mut entry = self
                .appointments
                .get_mut(&id)
                .filter(|a| a.tenant_id == tenant)
                .ok_or(ScheduleError::NotFound(id))?;
            if !entry.is_confirmed() {
                return Err(ScheduleError::Cancelled(id));
            }
            let vacated = std::mem::replace(&mut entry.span, to);
            let old_slot = entry.slot_id.take();
            (vacated, old_slot, entry.value().clone())
        };
        if let Some((_, span)) = book.iter_mut().find(|(owner, _)| *owner == id) {
            *span = to;
        }
        // The original slot no longer backs this appointment.
        if let Some(slot_id) = old_slot {
            self.slot_claims.remove_if(&slot_id, |_, owner| *owner == id);
        }
        Ok((vacated, moved))
    }

    async fn confirmed_for_staff(
        &self,
        tenant: &str,
        staff_id: Ulid,
        window: Span,
    ) -> Result<Vec<Appointment>, ScheduleError> {
        let mut out: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|a| {
                a.tenant_id == tenant
                    && a.staff_id == staff_id
                    && a.is_confirmed()
                    && a.span.overlaps(&window)
            })
            .map(|a| a.value().clone())
            .collect();
        out.sort_by_key(|a| a.span.start);
        Ok(out)
    }
}

// ── Working hours, busy times, bookable flags ────────────────────

/// A recurring weekly working block in UTC. `weekday` is Monday = 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHours {
    pub weekday: u8,
    pub start_minute: u32,
    pub end_minute: u32,
    #[serde(default)]
    pub location_id: Option<Ulid>,
    #[serde(default)]
    pub category: Option<String>,
}

impl WeeklyHours {
    pub fn is_valid(&self) -> bool {
        self.weekday < 7 && self.start_minute < self.end_minute && self.end_minute <= 24 * 60
    }
}

type StaffKey = (String, Ulid);

/// Process-local calendar: weekly working hours, external busy times and
/// online-bookable flags per `(tenant, staff)`.
#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    hours: DashMap<StaffKey, Vec<WeeklyHours>>,
    busy: DashMap<StaffKey, Vec<(Ulid, Span)>>,
    not_bookable: DashMap<String, HashSet<(Ulid, Ulid)>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the staff member's weekly hours. Invalid entries, and entries
    /// sharing a minute on the same weekday, are refused.
    pub fn set_working_hours(
        &self,
        tenant: &str,
        staff_id: Ulid,
        hours: Vec<WeeklyHours>,
    ) -> Result<(), ScheduleError> {
        if let Some(bad) = hours.iter().find(|h| !h.is_valid()) {
            return Err(ScheduleError::Invalid(format!("bad working hours: {bad:?}")));
        }
        let mut sorted: Vec<&WeeklyHours> = hours.iter().collect();
        sorted.sort_by_key(|h| (h.weekday, h.start_minute));
        if let Some(pair) = sorted
            .windows(2)
            .find(|w| w[0].weekday == w[1].weekday && w[1].start_minute < w[0].end_minute)
        {
            return Err(ScheduleError::Invalid(format!(
                "working hours overlap on weekday {}: {}-{} and {}-{}",
                pair[0].weekday,
                pair[0].start_minute,
                pair[0].end_minute,
                pair[1].start_minute,
                pair[1].end_minute
            )));
        }
        self.hours.insert((tenant.to_string(), staff_id), hours);
        Ok(())
    }

    pub fn add_busy_time(&self, tenant: &str, staff_id: Ulid, span: Span) -> Ulid {
        let id = Ulid::new();
        self.busy
            .entry((tenant.to_string(), staff_id))
            .or_default()
            .push((id, span));
        id
    }

    /// Returns the previous span.
    pub fn update_busy_time(&self, tenant: &str, staff_id: Ulid, id: Ulid, span: Span) -> Option<Span> {
        let mut entries = self.busy.get_mut(&(tenant.to_string(), staff_id))?;
        let (_, current) = entries.iter_mut().find(|(bid, _)| *bid == id)?;
        Some(std::mem::replace(current, span))
    }

    /// Returns the removed span.
    pub fn remove_busy_time(&self, tenant: &str, staff_id: Ulid, id: Ulid) -> Option<Span> {
        let mut entries = self.busy.get_mut(&(tenant.to_string(), staff_id))?;
        let pos = entries.iter().position(|(bid, _)| *bid == id)?;
        Some(entries.remove(pos).1)
    }

    pub fn set_bookable_online(&self, tenant: &str, staff_id: Ulid, location_id: Ulid, bookable: bool) {
        let mut set = self.not_bookable.entry(tenant.to_string()).or_default();
        if bookable {
            set.remove(&(staff_id, location_id));
        } else {
            set.insert((staff_id, location_id));
        }
    }
}

#[async_trait]
impl WorkingHoursProvider for InMemoryCalendar {
    async fn blocks(
        &self,
        tenant: &str,
        staff_id: Ulid,
        window: Span,
    ) -> Result<Vec<WorkingHoursBlock>, ScheduleError> {
        let Some(hours) = self.hours.get(&(tenant.to_string(), staff_id)) else {
            return Ok(Vec::new());
        };
        let mut blocks = Vec::new();
        let mut day = utc_day(window.start).start;
        while day < window.end {
            let wd = weekday(day);
            for h in hours.iter().filter(|h| h.weekday == wd) {
                let span = Span::new(
                    day + h.start_minute as Ms * MINUTE_MS,
                    day + h.end_minute as Ms * MINUTE_MS,
                );
                if let Some(span) = clamp(&span, &window) {
                    blocks.push(WorkingHoursBlock {
                        span,
                        location_id: h.location_id,
                        category: h.category.clone(),
                    });
                }
            }
            day += DAY_MS;
        }
        blocks.sort_by_key(|b| b.span.start);
        Ok(blocks)
    }

    async fn staff_ids(&self, tenant: &str) -> Result<Vec<Ulid>, ScheduleError> {
        Ok(self
            .hours
            .iter()
            .filter(|e| e.key().0 == tenant && !e.value().is_empty())
            .map(|e| e.key().1)
            .collect())
    }
}

#[async_trait]
impl BusyTimeProvider for InMemoryCalendar {
    async fn busy_times(
        &self,
        tenant: &str,
        staff_id: Ulid,
        window: Span,
    ) -> Result<Vec<Span>, ScheduleError> {
        Ok(self
            .busy
            .get(&(tenant.to_string(), staff_id))
            .map(|entries| {
                entries
                    .iter()
                    .map(|(_, span)| *span)
                    .filter(|span| span.overlaps(&window))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl BookableFlagProvider for InMemoryCalendar {
    async fn not_bookable_online(&self, tenant: &str) -> Result<HashSet<(Ulid, Ulid)>, ScheduleError> {
        Ok(self
            .not_bookable
            .get(tenant)
            .map(|set| set.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::HOUR_MS;

    const MONDAY: Ms = 1_767_571_200_000; // 2026-01-05T00:00:00Z

    fn new_appointment(slot_id: Option<Ulid>) -> NewAppointment {
        NewAppointment {
            tenant_id: "school".into(),
            staff_id: Ulid::new(),
            slot_id,
            span: Span::new(MONDAY + 9 * HOUR_MS, MONDAY + 10 * HOUR_MS),
            appointment_type: AppointmentType::Lesson,
            category: "B".into(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn second_appointment_for_slot_is_refused() {
        let store = InMemoryAppointments::new();
        let slot = Ulid::new();
        store.create(new_appointment(Some(slot))).await.unwrap();
        let err = store.create(new_appointment(Some(slot))).await.unwrap_err();
        assert!(matches!(err, ScheduleError::DuplicateSlot(id) if id == slot));
        assert_eq!(store.confirmed_for_slot(slot), 1);
    }

    #[tokio::test]
    async fn cancel_frees_slot_claim() {
        let store = InMemoryAppointments::new();
        let slot = Ulid::new();
        let a = store.create(new_appointment(Some(slot))).await.unwrap();
        let cancelled = store.cancel("school", a.id).await.unwrap();
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
        assert!(matches!(
            store.cancel("school", a.id).await,
            Err(ScheduleError::Cancelled(_))
        ));
        store.create(new_appointment(Some(slot))).await.unwrap();
    }

    #[tokio::test]
    async fn other_tenant_cannot_see_appointment() {
        let store = InMemoryAppointments::new();
        let a = store.create(new_appointment(None)).await.unwrap();
        assert!(store.get("school", a.id).await.is_ok());
        assert!(matches!(
            store.get("rival", a.id).await,
            Err(ScheduleError::NotFound(_))
        ));
        assert!(store.cancel("rival", a.id).await.is_err());
    }

    #[tokio::test]
    async fn reschedule_returns_vacated_span() {
        let store = InMemoryAppointments::new();
        let a = store.create(new_appointment(Some(Ulid::new()))).await.unwrap();
        let to = Span::new(MONDAY + 14 * HOUR_MS, MONDAY + 15 * HOUR_MS);
        let (vacated, moved) = store.reschedule("school", a.id, to).await.unwrap();
        assert_eq!(vacated, a.span);
        assert_eq!(moved.span, to);
        assert!(moved.slot_id.is_none());
    }

    fn at_hours(staff: Ulid, start: i64, end: i64) -> NewAppointment {
        NewAppointment {
            staff_id: staff,
            span: Span::new(MONDAY + start * HOUR_MS, MONDAY + end * HOUR_MS),
            ..new_appointment(None)
        }
    }

    #[tokio::test]
    async fn staff_member_cannot_be_double_booked() {
        let store = InMemoryAppointments::new();
        let staff = Ulid::new();
        let first = store.create(at_hours(staff, 9, 10)).await.unwrap();

        // Back-to-back is fine, any shared instant is not.
        store.create(at_hours(staff, 10, 11)).await.unwrap();
        let err = store.create(at_hours(staff, 8, 10)).await.unwrap_err();
        assert!(matches!(err, ScheduleError::Overlap(id) if id == first.id));
        let mut via_slot = at_hours(staff, 9, 10);
        via_slot.slot_id = Some(Ulid::new());
        assert!(matches!(store.create(via_slot).await, Err(ScheduleError::Overlap(_))));

        // Another staff member is independent.
        store.create(at_hours(Ulid::new(), 9, 10)).await.unwrap();

        // Cancelling frees the time.
        store.cancel("school", first.id).await.unwrap();
        store.create(at_hours(staff, 9, 10)).await.unwrap();
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn reschedule_refuses_taken_time() {
        let store = InMemoryAppointments::new();
        let staff = Ulid::new();
        let a = store.create(at_hours(staff, 9, 10)).await.unwrap();
        let b = store.create(at_hours(staff, 12, 13)).await.unwrap();

        let onto_b = Span::new(MONDAY + 12 * HOUR_MS, MONDAY + 13 * HOUR_MS);
        let err = store.reschedule("school", a.id, onto_b).await.unwrap_err();
        assert!(matches!(err, ScheduleError::Overlap(id) if id == b.id));

        // Moving within its own time is allowed, and the old time is freed.
        let later = Span::new(MONDAY + 9 * HOUR_MS + HOUR_MS / 2, MONDAY + 10 * HOUR_MS + HOUR_MS / 2);
        store.reschedule("school", a.id, later).await.unwrap();
        store.create(at_hours(staff, 8, 9)).await.unwrap();
        assert!(matches!(
            store.create(at_hours(staff, 10, 11)).await,
            Err(ScheduleError::Overlap(id)) if id == a.id
        ));
    }

    #[tokio::test]
    async fn create_validates_input() {
        let store = InMemoryAppointments::new();
        let mut bad = new_appointment(None);
        bad.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
        assert!(matches!(store.create(bad).await, Err(ScheduleError::Invalid(_))));
        let mut bad = new_appointment(None);
        bad.category = String::new();
        assert!(matches!(store.create(bad).await, Err(ScheduleError::Invalid(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn weekly_hours_expand_into_window() {
        let cal = InMemoryCalendar::new();
        let staff = Ulid::new();
        cal.set_working_hours(
            "school",
            staff,
            vec![
                WeeklyHours { weekday: 0, start_minute: 8 * 60, end_minute: 12 * 60, location_id: None, category: None },
                WeeklyHours { weekday: 2, start_minute: 13 * 60, end_minute: 17 * 60, location_id: None, category: None },
            ],
        )
        .unwrap();

        // Monday 10:00 until the following Monday 00:00.
        let window = Span::new(MONDAY + 10 * HOUR_MS, MONDAY + 7 * DAY_MS);
        let blocks = cal.blocks("school", staff, window).await.unwrap();
        let spans: Vec<_> = blocks.iter().map(|b| b.span).collect();
        assert_eq!(
            spans,
            vec![
                Span::new(MONDAY + 10 * HOUR_MS, MONDAY + 12 * HOUR_MS),
                Span::new(MONDAY + 2 * DAY_MS + 13 * HOUR_MS, MONDAY + 2 * DAY_MS + 17 * HOUR_MS),
            ]
        );
        assert_eq!(cal.staff_ids("school").await.unwrap(), vec![staff]);
        assert!(cal.staff_ids("rival").await.unwrap().is_empty());
    }

    #[test]
    fn invalid_weekly_hours_are_refused() {
        let cal = InMemoryCalendar::new();
        let bad = WeeklyHours { weekday: 7, start_minute: 0, end_minute: 60, location_id: None, category: None };
        assert!(cal.set_working_hours("school", Ulid::new(), vec![bad]).is_err());
    }

    #[test]
    fn overlapping_weekly_hours_are_refused() {
        let cal = InMemoryCalendar::new();
        let staff = Ulid::new();
        let hours = |weekday, start: u32, end: u32| WeeklyHours {
            weekday,
            start_minute: start * 60,
            end_minute: end * 60,
            location_id: None,
            category: None,
        };

        let err = cal
            .set_working_hours("school", staff, vec![hours(0, 10, 14), hours(0, 8, 12)])
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Invalid(_)));
        assert!(cal.hours.get(&("school".to_string(), staff)).is_none());

        // Back-to-back on one day, or the same hours on different days, is fine.
        cal.set_working_hours(
            "school",
            staff,
            vec![hours(0, 8, 12), hours(0, 12, 14), hours(1, 8, 12)],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn busy_time_lifecycle() {
        let cal = InMemoryCalendar::new();
        let staff = Ulid::new();
        let day = Span::new(MONDAY, MONDAY + DAY_MS);
        let first = Span::new(MONDAY + 9 * HOUR_MS, MONDAY + 10 * HOUR_MS);
        let id = cal.add_busy_time("school", staff, first);
        assert_eq!(cal.busy_times("school", staff, day).await.unwrap(), vec![first]);

        let second = Span::new(MONDAY + 11 * HOUR_MS, MONDAY + 12 * HOUR_MS);
        assert_eq!(cal.update_busy_time("school", staff, id, second), Some(first));
        assert_eq!(cal.remove_busy_time("school", staff, id), Some(second));
        assert!(cal.busy_times("school", staff, day).await.unwrap().is_empty());
        assert_eq!(cal.remove_busy_time("school", staff, id), None);
    }

    #[tokio::test]
    async fn bookable_flags_toggle() {
        let cal = InMemoryCalendar::new();
        let (staff, loc) = (Ulid::new(), Ulid::new());
        cal.set_bookable_online("school", staff, loc, false);
        assert!(cal.not_bookable_online("school").await.unwrap().contains(&(staff, loc)));
        cal.set_bookable_online("school", staff, loc, true);
        assert!(cal.not_bookable_online("school").await.unwrap().is_empty());
    }
}
