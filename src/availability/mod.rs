//! Read path: which slots can a customer book right now.

mod filter;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use ulid::Ulid;

use crate::error::SlotError;
use crate::limits::MAX_CATEGORY_LEN;
use crate::model::*;
use crate::observability::{AVAILABILITY_DEFENSE_FILTERED_TOTAL, AVAILABILITY_QUERY_DURATION_SECONDS};
use crate::schedule::{AppointmentStore, BookableFlagProvider};
use crate::slots::validate_range;
use crate::tenant::TenantManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    pub tenant: String,
    #[serde(default)]
    pub staff_id: Option<Ulid>,
    #[serde(default)]
    pub location_id: Option<Ulid>,
    /// Slots starting in `[start, end)` are returned.
    pub start: Ms,
    pub end: Ms,
    /// Minimum slot length.
    #[serde(default)]
    pub duration_ms: Option<Ms>,
    #[serde(default)]
    pub category: Option<String>,
}

/// What a customer sees of a bookable slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub duration_ms: Ms,
    pub location_id: Option<Ulid>,
    pub category: Option<String>,
}

impl From<&AvailabilitySlot> for SlotView {
    fn from(slot: &AvailabilitySlot) -> Self {
        Self {
            id: slot.id,
            staff_id: slot.staff_id,
            start: slot.span.start,
            end: slot.span.end,
            duration_ms: slot.span.duration_ms(),
            location_id: slot.location_id,
            category: slot.category.clone(),
        }
    }
}

pub struct AvailabilityService {
    tenants: Arc<TenantManager>,
    appointments: Arc<dyn AppointmentStore>,
    flags: Arc<dyn BookableFlagProvider>,
}

impl AvailabilityService {
    pub fn new(
        tenants: Arc<TenantManager>,
        appointments: Arc<dyn AppointmentStore>,
        flags: Arc<dyn BookableFlagProvider>,
    ) -> Self {
        Self {
            tenants,
            appointments,
            flags,
        }
    }

    /// Bookable slots matching `query`, ordered by start then staff.
    ///
    /// A slot whose hold lapsed but was not swept yet is offered only when no
    /// confirmed appointment overlaps it. After the primary filter, slots at a
    /// `(staff, location)` flagged not bookable online are dropped again.
    pub async fn available_slots(
        &self,
        query: &AvailabilityQuery,
    ) -> Result<Vec<AvailabilitySlot>, SlotError> {
        let started = std::time::Instant::now();
        let window = validate_range(query.start, query.end)?;
        if query.duration_ms.is_some_and(|d| d <= 0) {
            return Err(SlotError::invalid("duration must be positive"));
        }
        if query.category.as_ref().is_some_and(|c| c.len() > MAX_CATEGORY_LEN) {
            return Err(SlotError::invalid("category too long"));
        }
        // Reads never open a tenant: an unknown tenant simply has no slots.
        let Some(store) = self.tenants.get(&query.tenant) else {
            return Ok(Vec::new());
        };
        let now = self.tenants.clock().now_ms();

        let mut slots: Vec<AvailabilitySlot> = store
            .slots_starting_in(query.staff_id.as_ref(), &window)
            .await
            .into_iter()
            .filter(|slot| filter::matches(slot, query, now))
            .collect();

        slots = self.drop_booked_lapsed_holds(&query.tenant, window, slots, now).await?;

        let not_bookable = self.flags.not_bookable_online(&query.tenant).await?;
        let (mut slots, dropped) = filter::drop_not_bookable(slots, &not_bookable);
        if !dropped.is_empty() {
            metrics::counter!(AVAILABILITY_DEFENSE_FILTERED_TOTAL).increment(dropped.len() as u64);
            for slot in &dropped {
                warn!(
                    "slot {} of staff {} at location {:?} is not bookable online but passed the primary filter",
                    slot.id, slot.staff_id, slot.location_id
                );
            }
        }

        slots.sort_by(|a, b| {
            a.span
                .start
                .cmp(&b.span.start)
                .then_with(|| a.staff_id.cmp(&b.staff_id))
        });
        metrics::histogram!(AVAILABILITY_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(slots)
    }

    /// Lazy side of hold expiry: a lapsed hold reads as available unless a
    /// confirmed appointment already covers the slot.
    async fn drop_booked_lapsed_holds(
        &self,
        tenant: &str,
        window: Span,
        slots: Vec<AvailabilitySlot>,
        now: Ms,
    ) -> Result<Vec<AvailabilitySlot>, SlotError> {
        let lapsed_staff: HashSet<Ulid> = slots
            .iter()
            .filter(|s| s.hold_expired(now))
            .map(|s| s.staff_id)
            .collect();
        if lapsed_staff.is_empty() {
            return Ok(slots);
        }

        // Appointments may start before the window yet overlap its first slots.
        let lookup = Span::new(
            window.start - crate::limits::DAY_MS,
            window.end + crate::limits::DAY_MS,
        );
        let mut booked: HashMap<Ulid, Vec<Span>> = HashMap::new();
        for staff_id in lapsed_staff {
            let spans = self
                .appointments
                .confirmed_for_staff(tenant, staff_id, lookup)
                .await?
                .into_iter()
                .map(|a| a.span)
                .collect();
            booked.insert(staff_id, spans);
        }

        Ok(slots
            .into_iter()
            .filter(|slot| {
                !slot.hold_expired(now)
                    || !booked
                        .get(&slot.staff_id)
                        .is_some_and(|spans| spans.iter().any(|b| b.overlaps(&slot.span)))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::limits::{DAY_MS, HOUR_MS, MINUTE_MS};
    use crate::schedule::{AppointmentType, InMemoryAppointments, InMemoryCalendar, NewAppointment};
    use crate::store::Expect;
    use crate::tenant::TenantSettings;

    const T0: Ms = 1_767_261_600_000; // 2026-01-01T10:00:00Z
    const SLOT: Ms = 30 * MINUTE_MS;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("drivetime_test_availability").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    struct Fixture {
        service: AvailabilityService,
        tenants: Arc<TenantManager>,
        calendar: Arc<InMemoryCalendar>,
        appointments: Arc<InMemoryAppointments>,
        clock: Arc<ManualClock>,
    }

    fn fixture(name: &str) -> Fixture {
        let clock = Arc::new(ManualClock::new(T0 - HOUR_MS));
        let tenants = Arc::new(TenantManager::new(
            test_data_dir(name),
            TenantSettings::default(),
            clock.clone(),
            CancellationToken::new(),
        ));
        let calendar = Arc::new(InMemoryCalendar::new());
        let appointments = Arc::new(InMemoryAppointments::new());
        let service = AvailabilityService::new(tenants.clone(), appointments.clone(), calendar.clone());
        Fixture {
            service,
            tenants,
            calendar,
            appointments,
            clock,
        }
    }

    fn slot(staff_id: Ulid, start: Ms, location_id: Option<Ulid>) -> AvailabilitySlot {
        AvailabilitySlot {
            id: Ulid::new(),
            tenant_id: "school".into(),
            staff_id,
            span: Span::new(start, start + SLOT),
            location_id,
            category: Some("B".into()),
            is_available: true,
            reserved_until: None,
            reserved_by_session: None,
        }
    }

    async fn seed(f: &Fixture, staff_id: Ulid, slots: Vec<AvailabilitySlot>) {
        let store = f.tenants.get_or_create("school").unwrap();
        store
            .replace_window(staff_id, Span::new(T0 - DAY_MS, T0 + DAY_MS), slots, f.clock.now_ms())
            .await
            .unwrap();
    }

    fn query(start: Ms, end: Ms) -> AvailabilityQuery {
        AvailabilityQuery {
            tenant: "school".into(),
            staff_id: None,
            location_id: None,
            start,
            end,
            duration_ms: None,
            category: None,
        }
    }

    #[tokio::test]
    async fn returns_bookable_slots_in_order() {
        let f = fixture("order");
        let (a, b) = (Ulid::new(), Ulid::new());
        seed(&f, a, vec![slot(a, T0 + SLOT, None), slot(a, T0, None)]).await;
        seed(&f, b, vec![slot(b, T0, None)]).await;

        let slots = f.service.available_slots(&query(T0, T0 + HOUR_MS)).await.unwrap();
        assert_eq!(slots.len(), 3);
        assert!(slots.windows(2).all(|w| (w[0].span.start, w[0].staff_id) <= (w[1].span.start, w[1].staff_id)));

        // Start must lie in [start, end): the slot at T0 + SLOT is excluded here.
        let slots = f.service.available_slots(&query(T0, T0 + SLOT)).await.unwrap();
        assert_eq!(slots.len(), 2);
    }

    #[tokio::test]
    async fn held_slots_are_hidden_until_the_hold_lapses() {
        let f = fixture("holds");
        let staff = Ulid::new();
        let s = slot(staff, T0, None);
        let slot_id = s.id;
        seed(&f, staff, vec![s]).await;
        let store = f.tenants.get("school").unwrap();
        let now = f.clock.now_ms();
        store
            .compare_and_set(
                slot_id,
                Expect::Bookable,
                SlotWrite::Hold { session: SessionId::parse("cart").unwrap(), until: now + 1_000 },
                now,
            )
            .await
            .unwrap();

        assert!(f.service.available_slots(&query(T0, T0 + HOUR_MS)).await.unwrap().is_empty());
        f.clock.advance(1_000);
        let slots = f.service.available_slots(&query(T0, T0 + HOUR_MS)).await.unwrap();
        assert_eq!(slots.len(), 1);
    }

    #[tokio::test]
    async fn lapsed_hold_under_confirmed_appointment_is_hidden() {
        let f = fixture("lapsed_booked");
        let staff = Ulid::new();
        let s = slot(staff, T0, None);
        let slot_id = s.id;
        seed(&f, staff, vec![s]).await;
        let store = f.tenants.get("school").unwrap();
        let now = f.clock.now_ms();
        store
            .compare_and_set(
                slot_id,
                Expect::Bookable,
                SlotWrite::Hold { session: SessionId::parse("cart").unwrap(), until: now + 1_000 },
                now,
            )
            .await
            .unwrap();
        f.appointments
            .create(NewAppointment {
                tenant_id: "school".into(),
                staff_id: staff,
                slot_id: None,
                span: Span::new(T0, T0 + SLOT),
                appointment_type: AppointmentType::Lesson,
                category: "B".into(),
                notes: None,
            })
            .await
            .unwrap();

        f.clock.advance(2_000);
        assert!(f.service.available_slots(&query(T0, T0 + HOUR_MS)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn defense_filter_drops_flagged_locations() {
        let f = fixture("defense");
        let (staff, loc) = (Ulid::new(), Ulid::new());
        seed(&f, staff, vec![slot(staff, T0, Some(loc)), slot(staff, T0 + SLOT, None)]).await;
        f.calendar.set_bookable_online("school", staff, loc, false);

        let slots = f.service.available_slots(&query(T0, T0 + HOUR_MS)).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].location_id, None);
    }

    #[tokio::test]
    async fn unknown_tenant_has_no_slots_and_bad_ranges_fail() {
        let f = fixture("unknown");
        let mut q = query(T0, T0 + HOUR_MS);
        q.tenant = "nobody".into();
        assert!(f.service.available_slots(&q).await.unwrap().is_empty());
        assert!(f.tenants.get("nobody").is_none());

        let err = f.service.available_slots(&query(T0, T0)).await.unwrap_err();
        assert!(matches!(err, SlotError::Invalid(_)));
        let mut q = query(T0, T0 + HOUR_MS);
        q.duration_ms = Some(0);
        assert!(matches!(f.service.available_slots(&q).await, Err(SlotError::Invalid(_))));
    }
}
