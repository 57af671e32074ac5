//! Release / invalidate / reserve / stat operations over a tenant's slots.

mod manager;

pub use manager::SlotManager;

use crate::error::SlotError;
use crate::limits::*;
use crate::model::{Ms, Span};

/// Check a caller-supplied range and turn it into a `Span`.
pub fn validate_range(start: Ms, end: Ms) -> Result<Span, SlotError> {
    if start >= end {
        return Err(SlotError::invalid("start must be before end"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(SlotError::invalid("timestamp out of range"));
    }
    if end - start > MAX_QUERY_WINDOW_MS {
        return Err(SlotError::invalid("range too wide"));
    }
    Ok(Span::new(start, end))
}

/// The UTC calendar day containing `instant`.
pub fn utc_day(instant: Ms) -> Span {
    let midnight = instant.div_euclid(DAY_MS) * DAY_MS;
    Span::new(midnight, midnight + DAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOON: Ms = 1_767_268_800_000; // 2026-01-01T12:00:00Z

    #[test]
    fn range_validation() {
        assert!(validate_range(NOON, NOON + HOUR_MS).is_ok());
        assert!(matches!(validate_range(NOON, NOON), Err(SlotError::Invalid(_))));
        assert!(matches!(validate_range(NOON + 1, NOON), Err(SlotError::Invalid(_))));
        assert!(matches!(validate_range(0, HOUR_MS), Err(SlotError::Invalid(_))));
        assert!(matches!(
            validate_range(NOON, NOON + MAX_QUERY_WINDOW_MS + 1),
            Err(SlotError::Invalid(_))
        ));
    }

    #[test]
    fn utc_day_bounds() {
        let day = utc_day(NOON);
        assert_eq!(day.start, NOON - 12 * HOUR_MS);
        assert_eq!(day.duration_ms(), DAY_MS);
        assert_eq!(utc_day(day.start), day);
        assert_eq!(utc_day(day.end - 1), day);
        assert_ne!(utc_day(day.end), day);
    }
}
