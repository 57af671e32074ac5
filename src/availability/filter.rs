use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

use super::AvailabilityQuery;

/// Primary filter: bookable at `now` and matching every query field.
pub(super) fn matches(slot: &AvailabilitySlot, query: &AvailabilityQuery, now: Ms) -> bool {
    slot.is_bookable(now)
        && query.staff_id.is_none_or(|id| slot.staff_id == id)
        && query.location_id.is_none_or(|id| slot.location_id == Some(id))
        && query
            .category
            .as_deref()
            .is_none_or(|c| slot.category.as_deref() == Some(c))
        && query.duration_ms.is_none_or(|d| slot.span.duration_ms() >= d)
}

/// Drop slots whose `(staff, location)` pair is flagged not bookable online.
/// Returns the kept slots and the dropped ones.
pub(super) fn drop_not_bookable(
    slots: Vec<AvailabilitySlot>,
    not_bookable: &HashSet<(Ulid, Ulid)>,
) -> (Vec<AvailabilitySlot>, Vec<AvailabilitySlot>) {
    if not_bookable.is_empty() {
        return (slots, Vec::new());
    }
    slots.into_iter().partition(|slot| {
        slot.location_id
            .is_none_or(|loc| !not_bookable.contains(&(slot.staff_id, loc)))
    })
}
