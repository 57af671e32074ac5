use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::error::SlotError;
use crate::model::InvalidSessionId;
use crate::schedule::ScheduleError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error("missing x-tenant-id header")]
    MissingTenant,
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Status and the machine-readable `code` of the error body.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Slot(e) => match e {
                SlotError::SlotAlreadyReserved(_) => (StatusCode::CONFLICT, "SlotAlreadyReserved"),
                SlotError::ReservationExpired(_) => (StatusCode::CONFLICT, "ReservationExpired"),
                SlotError::TenantMismatch { .. } => (StatusCode::FORBIDDEN, "TenantMismatch"),
                SlotError::SlotNotFound(_) => (StatusCode::NOT_FOUND, "SlotNotFound"),
                SlotError::Invalid(_) => (StatusCode::BAD_REQUEST, "Invalid"),
                SlotError::LimitExceeded(_) => (StatusCode::BAD_REQUEST, "LimitExceeded"),
                SlotError::Appointments(ScheduleError::NotFound(_)) => {
                    (StatusCode::NOT_FOUND, "AppointmentNotFound")
                }
                SlotError::Appointments(ScheduleError::Invalid(_)) => {
                    (StatusCode::BAD_REQUEST, "Invalid")
                }
                SlotError::Appointments(ScheduleError::Cancelled(_)) => {
                    (StatusCode::CONFLICT, "AppointmentCancelled")
                }
                SlotError::Appointments(ScheduleError::DuplicateSlot(_)) => {
                    (StatusCode::CONFLICT, "SlotAlreadyBooked")
                }
                SlotError::Appointments(ScheduleError::Overlap(_)) => {
                    (StatusCode::CONFLICT, "AppointmentConflict")
                }
                SlotError::Appointments(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Appointments"),
                SlotError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Store"),
            },
            ApiError::MissingTenant => (StatusCode::BAD_REQUEST, "MissingTenant"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Invalid"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("request failed: {self}");
        } else {
            debug!("request rejected ({code}): {self}");
        }
        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<InvalidSessionId> for ApiError {
    fn from(e: InvalidSessionId) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        ApiError::Slot(SlotError::Appointments(e))
    }
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;

    async fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn conflicts_are_409_with_kind_as_code() {
        let (status, body) = body_of(SlotError::SlotAlreadyReserved(Ulid::new()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "SlotAlreadyReserved");

        let (status, body) = body_of(SlotError::ReservationExpired(Ulid::new()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ReservationExpired");

        let (status, body) = body_of(ScheduleError::DuplicateSlot(Ulid::new()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "SlotAlreadyBooked");

        let (status, body) = body_of(ScheduleError::Overlap(Ulid::new()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "AppointmentConflict");
    }

    #[tokio::test]
    async fn remaining_mappings() {
        let mismatch = SlotError::TenantMismatch { expected: "a".into(), actual: "b".into() };
        assert_eq!(body_of(mismatch.into()).await.0, StatusCode::FORBIDDEN);
        assert_eq!(body_of(SlotError::invalid("bad").into()).await.0, StatusCode::BAD_REQUEST);
        assert_eq!(
            body_of(ScheduleError::NotFound(Ulid::new()).into()).await.0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            body_of(ScheduleError::Unavailable("down".into()).into()).await.0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let (status, body) = body_of(ApiError::Unauthorized).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "missing or invalid bearer token");
    }
}
