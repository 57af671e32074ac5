//! JSON-over-HTTP surface.
//!
//! Every route except `/health` needs the `x-tenant-id` header and, when a
//! token is configured, `Authorization: Bearer <token>`.
//!
//! Customer flow:
//! - GET    /available-slots
//! - POST   /reserve-slot
//! - POST   /create-appointment
//!
//! Schedule changes:
//! - POST   /queue-recalc
//! - POST   /cancel-appointment
//! - POST   /move-appointment
//! - GET    /slot-stats
//!
//! Office administration:
//! - PUT    /working-hours
//! - POST   /busy-times
//! - PUT    /busy-times/:id
//! - DELETE /busy-times/:id?staff_id=
//! - POST   /appointments
//! - PUT    /bookable-online

mod auth;
mod error;
mod handlers;

pub use auth::{TENANT_HEADER, Tenant};
pub use error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};

use crate::observability::HTTP_REQUESTS_TOTAL;
use crate::platform::Platform;

pub fn router(platform: Arc<Platform>) -> Router {
    Router::new()
        .route("/available-slots", get(handlers::available_slots))
        .route("/reserve-slot", post(handlers::reserve_slot))
        .route("/create-appointment", post(handlers::create_appointment))
        .route("/queue-recalc", post(handlers::queue_recalc))
        .route("/cancel-appointment", post(handlers::cancel_appointment))
        .route("/move-appointment", post(handlers::move_appointment))
        .route("/slot-stats", get(handlers::slot_stats))
        .route("/working-hours", put(handlers::set_working_hours))
        .route("/busy-times", post(handlers::add_busy_time))
        .route(
            "/busy-times/:id",
            put(handlers::update_busy_time).delete(handlers::remove_busy_time),
        )
        .route("/appointments", post(handlers::add_appointment))
        .route("/bookable-online", put(handlers::set_bookable_online))
        .layer(middleware::from_fn_with_state(
            platform.clone(),
            auth::require_token,
        ))
        .route("/health", get(handlers::health))
        .layer(middleware::from_fn(count_requests))
        .with_state(platform)
}

async fn count_requests(matched: Option<MatchedPath>, request: Request, next: Next) -> Response {
    let route = matched
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}
