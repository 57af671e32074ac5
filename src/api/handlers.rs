use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use ulid::Ulid;

use crate::availability::{AvailabilityQuery, SlotView};
use crate::error::SlotError;
use crate::model::{Ms, SessionId, SlotStats};
use crate::platform::Platform;
use crate::recalc::{RecalcRequest, RecalcTrigger, enqueue_best_effort};
use crate::reconcile::ReconcileOutcome;
use crate::reservation::{BookingRequest, ReservationSession};
use crate::schedule::{Appointment, AppointmentType, NewAppointment, WeeklyHours};
use crate::slots::validate_range;

use super::ApiResult;
use super::auth::Tenant;
use super::error::ApiError;

type AppState = State<Arc<Platform>>;

// ── Customer flow ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SlotsParams {
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub staff: Option<Ulid>,
    #[serde(default)]
    pub location: Option<Ulid>,
    pub start_date: Ms,
    pub end_date: Ms,
    #[serde(default)]
    pub duration: Option<Ms>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlotsResponse {
    pub slots: Vec<SlotView>,
}

pub async fn available_slots(
    State(platform): AppState,
    tenant: Tenant,
    params: Result<Query<SlotsParams>, QueryRejection>,
) -> ApiResult<Json<SlotsResponse>> {
    let Query(params) = params?;
    let tenant = tenant.check(params.tenant.as_deref())?;
    let query = AvailabilityQuery {
        tenant: tenant.to_string(),
        staff_id: params.staff,
        location_id: params.location,
        start: params.start_date,
        end: params.end_date,
        duration_ms: params.duration,
        category: params.category,
    };
    let slots = platform.availability.available_slots(&query).await?;
    Ok(Json(SlotsResponse {
        slots: slots.iter().map(SlotView::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReserveBody {
    #[serde(default)]
    pub tenant: Option<String>,
    pub slot_id: Ulid,
    pub session_id: String,
}

pub async fn reserve_slot(
    State(platform): AppState,
    tenant: Tenant,
    body: Result<Json<ReserveBody>, JsonRejection>,
) -> ApiResult<Json<ReservationSession>> {
    let Json(body) = body?;
    let tenant = tenant.check(body.tenant.as_deref())?;
    let session = SessionId::parse(body.session_id)?;
    let held = platform
        .reservations
        .reserve(tenant, body.slot_id, &session)
        .await?;
    Ok(Json(held))
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentBody {
    #[serde(default)]
    pub tenant: Option<String>,
    pub slot_id: Ulid,
    pub session_id: String,
    pub appointment_type: AppointmentType,
    pub category: String,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn create_appointment(
    State(platform): AppState,
    tenant: Tenant,
    body: Result<Json<CreateAppointmentBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Appointment>)> {
    let Json(body) = body?;
    let tenant = tenant.check(body.tenant.as_deref())?;
    let request = BookingRequest {
        tenant: tenant.to_string(),
        slot_id: body.slot_id,
        session_id: SessionId::parse(body.session_id)?,
        appointment_type: body.appointment_type,
        category: body.category,
        notes: body.notes,
    };
    let appointment = platform.reservations.confirm_booking(request).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

// ── Schedule changes ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct QueueRecalcBody {
    pub staff_id: Ulid,
    pub tenant_id: String,
    #[serde(default = "manual")]
    pub trigger: RecalcTrigger,
}

fn manual() -> RecalcTrigger {
    RecalcTrigger::Manual
}

/// Never fails because of the queue: a rejected request reports `queued: false`.
pub async fn queue_recalc(
    State(platform): AppState,
    tenant: Tenant,
    body: Result<Json<QueueRecalcBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body?;
    let tenant = tenant.check(Some(&body.tenant_id))?;
    let queued = enqueue_best_effort(
        platform.queue.as_ref(),
        RecalcRequest::new(tenant, body.staff_id, body.trigger),
    );
    Ok(Json(json!({ "queued": queued })))
}

/// A schedule change and what reconciling the slots with it did.
#[derive(Debug, Serialize)]
pub struct Reconciled<T> {
    #[serde(flatten)]
    pub result: T,
    pub reconciliation: ReconcileOutcome,
}

#[derive(Debug, Serialize)]
pub struct AppointmentChange {
    pub appointment: Appointment,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub appointment_id: Ulid,
}

pub async fn cancel_appointment(
    State(platform): AppState,
    Tenant(tenant): Tenant,
    body: Result<Json<CancelBody>, JsonRejection>,
) -> ApiResult<Json<Reconciled<AppointmentChange>>> {
    let Json(body) = body?;
    let (appointment, reconciliation) = platform
        .reconciler
        .cancel_appointment(&tenant, body.appointment_id)
        .await?;
    Ok(Json(Reconciled {
        result: AppointmentChange { appointment },
        reconciliation,
    }))
}

#[derive(Debug, Deserialize)]
pub struct MoveBody {
    pub appointment_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

pub async fn move_appointment(
    State(platform): AppState,
    Tenant(tenant): Tenant,
    body: Result<Json<MoveBody>, JsonRejection>,
) -> ApiResult<Json<Reconciled<AppointmentChange>>> {
    let Json(body) = body?;
    let (appointment, reconciliation) = platform
        .reconciler
        .move_appointment(&tenant, body.appointment_id, body.start, body.end)
        .await?;
    Ok(Json(Reconciled {
        result: AppointmentChange { appointment },
        reconciliation,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub staff: Ulid,
    pub date: Ms,
}

/// Reads never open a tenant: one that was never written to has empty days.
pub async fn slot_stats(
    State(platform): AppState,
    Tenant(tenant): Tenant,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> ApiResult<Json<SlotStats>> {
    let Query(params) = params?;
    let Some(manager) = platform.tenants.existing_manager(&tenant) else {
        validate_range(params.date, params.date.saturating_add(1))?;
        return Ok(Json(SlotStats::default()));
    };
    let stats = manager
        .get_slot_stats(params.staff, params.date, &tenant)
        .await?;
    Ok(Json(stats))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── Office administration ────────────────────────────────────────

/// Refuse tenant names that cannot be stored before any calendar write.
fn open_tenant(platform: &Platform, tenant: &str) -> ApiResult<()> {
    platform
        .tenants
        .get_or_create(tenant)
        .map_err(SlotError::from)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct WorkingHoursBody {
    pub staff_id: Ulid,
    pub hours: Vec<WeeklyHours>,
}

pub async fn set_working_hours(
    State(platform): AppState,
    Tenant(tenant): Tenant,
    body: Result<Json<WorkingHoursBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body?;
    open_tenant(&platform, &tenant)?;
    platform
        .calendar
        .set_working_hours(&tenant, body.staff_id, body.hours)?;
    let reconciliation = platform
        .reconciler
        .working_hours_changed(&tenant, body.staff_id);
    Ok(Json(json!({ "reconciliation": reconciliation })))
}

#[derive(Debug, Deserialize)]
pub struct BusyTimeBody {
    pub staff_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

#[derive(Debug, Serialize)]
pub struct BusyTimeChange {
    pub id: Ulid,
}

pub async fn add_busy_time(
    State(platform): AppState,
    Tenant(tenant): Tenant,
    body: Result<Json<BusyTimeBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Reconciled<BusyTimeChange>>)> {
    let Json(body) = body?;
    let span = validate_range(body.start, body.end)?;
    open_tenant(&platform, &tenant)?;
    let id = platform.calendar.add_busy_time(&tenant, body.staff_id, span);
    let reconciliation = platform
        .reconciler
        .busy_time_added(&tenant, body.staff_id, id, span)
        .await;
    Ok((
        StatusCode::CREATED,
        Json(Reconciled {
            result: BusyTimeChange { id },
            reconciliation,
        }),
    ))
}

pub async fn update_busy_time(
    State(platform): AppState,
    Tenant(tenant): Tenant,
    id: Result<Path<Ulid>, PathRejection>,
    body: Result<Json<BusyTimeBody>, JsonRejection>,
) -> ApiResult<Json<Reconciled<BusyTimeChange>>> {
    let Path(id) = id?;
    let Json(body) = body?;
    let span = validate_range(body.start, body.end)?;
    let old = platform
        .calendar
        .update_busy_time(&tenant, body.staff_id, id, span)
        .ok_or_else(|| ApiError::NotFound(format!("busy time not found: {id}")))?;
    let reconciliation = platform
        .reconciler
        .busy_time_updated(&tenant, body.staff_id, id, old, span)
        .await;
    Ok(Json(Reconciled {
        result: BusyTimeChange { id },
        reconciliation,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StaffParam {
    pub staff_id: Ulid,
}

pub async fn remove_busy_time(
    State(platform): AppState,
    Tenant(tenant): Tenant,
    id: Result<Path<Ulid>, PathRejection>,
    params: Result<Query<StaffParam>, QueryRejection>,
) -> ApiResult<Json<Reconciled<BusyTimeChange>>> {
    let Path(id) = id?;
    let Query(params) = params?;
    let span = platform
        .calendar
        .remove_busy_time(&tenant, params.staff_id, id)
        .ok_or_else(|| ApiError::NotFound(format!("busy time not found: {id}")))?;
    let reconciliation = platform
        .reconciler
        .busy_time_removed(&tenant, params.staff_id, id, span)
        .await;
    Ok(Json(Reconciled {
        result: BusyTimeChange { id },
        reconciliation,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OfficeAppointmentBody {
    pub staff_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub appointment_type: AppointmentType,
    pub category: String,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn add_appointment(
    State(platform): AppState,
    Tenant(tenant): Tenant,
    body: Result<Json<OfficeAppointmentBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Reconciled<AppointmentChange>>)> {
    let Json(body) = body?;
    let span = validate_range(body.start, body.end)?;
    let (appointment, reconciliation) = platform
        .reconciler
        .create_appointment(NewAppointment {
            tenant_id: tenant,
            staff_id: body.staff_id,
            slot_id: None,
            span,
            appointment_type: body.appointment_type,
            category: body.category,
            notes: body.notes,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Reconciled {
            result: AppointmentChange { appointment },
            reconciliation,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BookableBody {
    pub staff_id: Ulid,
    pub location_id: Ulid,
    pub bookable: bool,
}

pub async fn set_bookable_online(
    State(platform): AppState,
    Tenant(tenant): Tenant,
    body: Result<Json<BookableBody>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(body) = body?;
    open_tenant(&platform, &tenant)?;
    platform
        .calendar
        .set_bookable_online(&tenant, body.staff_id, body.location_id, body.bookable);
    Ok(StatusCode::NO_CONTENT)
}
