use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_SESSION_ID_LEN;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Strict half-open overlap. Used by slot generation.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Inclusive-boundary overlap: intervals that only touch at one instant count.
    /// This is the predicate release/invalidate/find operate on; back-to-back
    /// lessons are affected by it, so it must not be tightened silently.
    pub fn touches(&self, other: &Span) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Opaque identifier of one customer's checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidSessionId> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(InvalidSessionId::Empty);
        }
        if raw.len() > MAX_SESSION_ID_LEN {
            return Err(InvalidSessionId::TooLong(raw.len()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = InvalidSessionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSessionId {
    #[error("session id must not be empty")]
    Empty,
    #[error("session id is {0} bytes, max is {MAX_SESSION_ID_LEN}")]
    TooLong(usize),
}

/// One bookable unit of a staff member's time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Ulid,
    pub tenant_id: String,
    pub staff_id: Ulid,
    pub span: Span,
    pub location_id: Option<Ulid>,
    pub category: Option<String>,
    pub is_available: bool,
    pub reserved_until: Option<Ms>,
    pub reserved_by_session: Option<SessionId>,
}

/// Classification of a slot at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Available,
    Reserved,
    Booked,
}

impl AvailabilitySlot {
    pub fn hold_active(&self, now: Ms) -> bool {
        self.reserved_until.is_some_and(|until| now < until)
    }

    pub fn hold_expired(&self, now: Ms) -> bool {
        self.reserved_until.is_some_and(|until| now >= until)
    }

    /// Available, or held by a hold that has already lapsed.
    pub fn is_bookable(&self, now: Ms) -> bool {
        self.is_available || self.hold_expired(now)
    }

    pub fn is_held_by(&self, session: &SessionId, now: Ms) -> bool {
        self.hold_active(now) && self.reserved_by_session.as_ref() == Some(session)
    }

    pub fn state(&self, now: Ms) -> SlotState {
        if self.is_bookable(now) {
            SlotState::Available
        } else if self.hold_active(now) {
            SlotState::Reserved
        } else {
            SlotState::Booked
        }
    }

    /// Apply a write to the stored fields. Returns false when nothing changed.
    pub fn apply(&mut self, write: &SlotWrite) -> bool {
        let (is_available, reserved_until, reserved_by_session) = match write {
            SlotWrite::Release => (true, None, None),
            SlotWrite::Block => (false, None, None),
            SlotWrite::Hold { session, until } => (false, Some(*until), Some(session.clone())),
        };
        if self.is_available == is_available
            && self.reserved_until == reserved_until
            && self.reserved_by_session == reserved_by_session
        {
            return false;
        }
        self.is_available = is_available;
        self.reserved_until = reserved_until;
        self.reserved_by_session = reserved_by_session;
        true
    }
}

/// The three shapes a stored slot can be written into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotWrite {
    /// `is_available = true`, hold fields cleared.
    Release,
    /// `is_available = false`, hold fields cleared: a booking or an external block.
    Block,
    /// `is_available = false` with a hold owned by `session` until `until`.
    Hold { session: SessionId, until: Ms },
}

/// All slots of one staff member, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct StaffSlots {
    pub staff_id: Ulid,
    pub slots: Vec<AvailabilitySlot>,
}

impl StaffSlots {
    pub fn new(staff_id: Ulid) -> Self {
        Self {
            staff_id,
            slots: Vec::new(),
        }
    }

    /// Insert slot maintaining sort order by span.start.
    pub fn insert_slot(&mut self, slot: AvailabilitySlot) {
        let pos = self
            .slots
            .partition_point(|s| s.span.start <= slot.span.start);
        self.slots.insert(pos, slot);
    }

    pub fn get(&self, id: &Ulid) -> Option<&AvailabilitySlot> {
        self.slots.iter().find(|s| s.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut AvailabilitySlot> {
        self.slots.iter_mut().find(|s| s.id == *id)
    }

    /// Slots matching the inclusive overlap predicate against `query`.
    /// Binary search skips every slot starting after `query.end`.
    pub fn touching(&self, query: &Span) -> impl Iterator<Item = &AvailabilitySlot> {
        let right_bound = self.slots.partition_point(|s| s.span.start <= query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.span.end >= query.start)
    }

    /// Slots whose start lies in `[window.start, window.end)`.
    pub fn starting_in(&self, window: &Span) -> &[AvailabilitySlot] {
        let lo = self.slots.partition_point(|s| s.span.start < window.start);
        let hi = self.slots.partition_point(|s| s.span.start < window.end);
        &self.slots[lo..hi]
    }

    /// Drop every slot starting inside `window`, returning them.
    pub fn drain_window(&mut self, window: &Span) -> Vec<AvailabilitySlot> {
        let lo = self.slots.partition_point(|s| s.span.start < window.start);
        let hi = self.slots.partition_point(|s| s.span.start < window.end);
        self.slots.drain(lo..hi).collect()
    }
}

/// WAL record. One variant per kind of write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Every slot of `staff_id` starting inside `window` is replaced by `slots`.
    SlotsGenerated {
        staff_id: Ulid,
        window: Span,
        slots: Vec<AvailabilitySlot>,
    },
    SlotsWritten {
        staff_id: Ulid,
        slot_ids: Vec<Ulid>,
        write: SlotWrite,
    },
}

impl Event {
    pub fn staff_id(&self) -> Ulid {
        match self {
            Event::SlotsGenerated { staff_id, .. } | Event::SlotsWritten { staff_id, .. } => {
                *staff_id
            }
        }
    }
}

/// Per-day classification counts. `total == available + reserved + booked`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStats {
    pub total: usize,
    pub available: usize,
    pub reserved: usize,
    pub booked: usize,
}

impl SlotStats {
    pub fn record(&mut self, state: SlotState) {
        self.total += 1;
        match state {
            SlotState::Available => self.available += 1,
            SlotState::Reserved => self.reserved += 1,
            SlotState::Booked => self.booked += 1,
        }
    }
}
