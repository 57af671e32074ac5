use thiserror::Error;
use ulid::Ulid;

use crate::model::SlotState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("slot not found: {0}")]
    SlotNotFound(Ulid),
    #[error("slot {slot_id} belongs to tenant {actual:?}, not {expected:?}")]
    TenantMismatch {
        slot_id: Ulid,
        expected: String,
        actual: String,
    },
    /// A conditional write found the row in a state it does not accept.
    #[error("slot {slot_id} is {state:?}: write precondition failed")]
    PreconditionFailed { slot_id: Ulid, state: SlotState },
    #[error("invalid write: {0}")]
    Invalid(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}
