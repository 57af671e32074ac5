use crate::model::Ms;

pub const SECOND_MS: Ms = 1_000;
pub const MINUTE_MS: Ms = 60 * SECOND_MS;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// How long a checkout hold keeps a slot. Overridable via `DRIVETIME_HOLD_TTL_SECS`.
pub const DEFAULT_HOLD_TTL_MS: Ms = 15 * MINUTE_MS;
pub const MIN_HOLD_TTL_MS: Ms = 10 * SECOND_MS;
pub const MAX_HOLD_TTL_MS: Ms = 2 * HOUR_MS;

// ── Tenancy ──────────────────────────────────────────────────────

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

// ── Input sizes ──────────────────────────────────────────────────

pub const MAX_SESSION_ID_LEN: usize = 128;
pub const MAX_CATEGORY_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 2_000;

// ── Time ranges ──────────────────────────────────────────────────

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// Widest range accepted by availability queries and slot range operations.
pub const MAX_QUERY_WINDOW_MS: Ms = 62 * DAY_MS;

// ── Store ────────────────────────────────────────────────────────

pub const MAX_SLOTS_PER_STAFF: usize = 20_000;
pub const MIN_SLOT_LEN_MS: Ms = 5 * MINUTE_MS;
pub const MAX_GENERATION_HORIZON_MS: Ms = 180 * DAY_MS;

// ── Recalculation ────────────────────────────────────────────────

pub const MAX_RECALC_ATTEMPTS: u32 = 3;
