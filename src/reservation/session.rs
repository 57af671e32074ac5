use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

/// A customer's hold on one slot, as handed back by a successful reservation.
/// It exists only through the slot's hold fields and dies with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSession {
    pub session_id: SessionId,
    pub slot_id: Ulid,
    pub tenant_id: String,
    pub staff_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub reserved_until: Ms,
}

impl ReservationSession {
    /// The session view of `slot`, if `slot` currently carries a hold.
    pub fn from_slot(slot: &AvailabilitySlot) -> Option<Self> {
        Some(Self {
            session_id: slot.reserved_by_session.clone()?,
            slot_id: slot.id,
            tenant_id: slot.tenant_id.clone(),
            staff_id: slot.staff_id,
            start: slot.span.start,
            end: slot.span.end,
            reserved_until: slot.reserved_until?,
        })
    }

    pub fn is_expired(&self, now: Ms) -> bool {
        now >= self.reserved_until
    }

    pub fn remaining_ms(&self, now: Ms) -> Ms {
        (self.reserved_until - now).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(until: Option<Ms>, session: Option<&str>) -> AvailabilitySlot {
        AvailabilitySlot {
            id: Ulid::new(),
            tenant_id: "school".into(),
            staff_id: Ulid::new(),
            span: Span::new(1_000, 2_000),
            location_id: None,
            category: None,
            is_available: until.is_none(),
            reserved_until: until,
            reserved_by_session: session.map(|s| SessionId::parse(s).unwrap()),
        }
    }

    #[test]
    fn only_held_slots_have_a_session() {
        assert!(ReservationSession::from_slot(&held(None, None)).is_none());
        let session = ReservationSession::from_slot(&held(Some(500), Some("cart"))).unwrap();
        assert_eq!(session.session_id.as_str(), "cart");
        assert_eq!((session.start, session.end), (1_000, 2_000));
    }

    #[test]
    fn expiry_and_remaining_time() {
        let session = ReservationSession::from_slot(&held(Some(500), Some("cart"))).unwrap();
        assert!(!session.is_expired(499));
        assert_eq!(session.remaining_ms(400), 100);
        assert!(session.is_expired(500));
        assert_eq!(session.remaining_ms(900), 0);
    }
}
