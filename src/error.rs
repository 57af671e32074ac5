use thiserror::Error;
use ulid::Ulid;

use crate::schedule::ScheduleError;
use crate::store::StoreError;
use crate::tenant::TenantError;

/// Failures of the slot operations and the flows built on them.
#[derive(Debug, Error)]
pub enum SlotError {
    /// A concurrent reservation won the race for this slot.
    #[error("slot {0} is already reserved")]
    SlotAlreadyReserved(Ulid),
    /// The caller's hold lapsed, or never belonged to the caller.
    #[error("reservation on slot {0} expired or is held by another session")]
    ReservationExpired(Ulid),
    #[error("tenant mismatch: request is for {actual:?}, resource belongs to {expected:?}")]
    TenantMismatch { expected: String, actual: String },
    #[error("slot not found: {0}")]
    SlotNotFound(Ulid),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("appointment store: {0}")]
    Appointments(#[from] ScheduleError),
    #[error(transparent)]
    Store(StoreError),
}

impl SlotError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SlotError::Invalid(msg.into())
    }
}

impl From<StoreError> for SlotError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SlotNotFound(id) => SlotError::SlotNotFound(id),
            StoreError::TenantMismatch {
                expected, actual, ..
            } => SlotError::TenantMismatch { expected, actual },
            StoreError::Invalid(msg) => SlotError::Invalid(msg.to_string()),
            StoreError::LimitExceeded(msg) => SlotError::LimitExceeded(msg),
            other => SlotError::Store(other),
        }
    }
}

/// A release/invalidate/enqueue step that failed after the primary write
/// already succeeded. Never returned as an error; collected and logged.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReconciliationFailure {
    pub step: &'static str,
    pub staff_id: Ulid,
    pub message: String,
}

impl ReconciliationFailure {
    pub fn new(step: &'static str, staff_id: Ulid, err: impl std::fmt::Display) -> Self {
        Self {
            step,
            staff_id,
            message: err.to_string(),
        }
    }
}

impl From<TenantError> for SlotError {
    fn from(e: TenantError) -> Self {
        match e {
            TenantError::NameTooLong | TenantError::InvalidName => SlotError::Invalid(e.to_string()),
            TenantError::TooManyTenants => SlotError::LimitExceeded("too many tenants"),
            TenantError::Io(io) => SlotError::Store(StoreError::Wal(io.to_string())),
        }
    }
}
