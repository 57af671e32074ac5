//! Collaborators the slot engine reads from and writes to: appointments,
//! working hours, external busy times and the online-bookable flags.

mod memory;

pub use memory::{InMemoryAppointments, InMemoryCalendar, WeeklyHours};

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Ms, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    Lesson,
    Exam,
    TrialLesson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub tenant_id: String,
    pub staff_id: Ulid,
    pub slot_id: Option<Ulid>,
    pub span: Span,
    pub appointment_type: AppointmentType,
    pub category: String,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
}

impl Appointment {
    pub fn is_confirmed(&self) -> bool {
        self.status == AppointmentStatus::Confirmed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub tenant_id: String,
    pub staff_id: Ulid,
    pub slot_id: Option<Ulid>,
    pub span: Span,
    pub appointment_type: AppointmentType,
    pub category: String,
    pub notes: Option<String>,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("appointment not found: {0}")]
    NotFound(Ulid),
    #[error("slot {0} already has a confirmed appointment")]
    DuplicateSlot(Ulid),
    /// The staff member already has a confirmed appointment at that time.
    #[error("overlaps confirmed appointment {0}")]
    Overlap(Ulid),
    #[error("appointment {0} is cancelled")]
    Cancelled(Ulid),
    #[error("invalid appointment: {0}")]
    Invalid(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A stretch of time a staff member works, at an optional location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHoursBlock {
    pub span: Span,
    pub location_id: Option<Ulid>,
    pub category: Option<String>,
}

/// Durable record of bookings.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Fails with `DuplicateSlot` if `slot_id` already backs a confirmed appointment.
    async fn create(&self, new: NewAppointment) -> Result<Appointment, ScheduleError>;

    async fn get(&self, tenant: &str, id: Ulid) -> Result<Appointment, ScheduleError>;

    async fn cancel(&self, tenant: &str, id: Ulid) -> Result<Appointment, ScheduleError>;

    /// Move a confirmed appointment. Returns the vacated span and the updated record.
    async fn reschedule(
        &self,
        tenant: &str,
        id: Ulid,
        to: Span,
    ) -> Result<(Span, Appointment), ScheduleError>;

    /// Confirmed appointments of `staff_id` overlapping `window`.
    async fn confirmed_for_staff(
        &self,
        tenant: &str,
        staff_id: Ulid,
        window: Span,
    ) -> Result<Vec<Appointment>, ScheduleError>;
}

#[async_trait]
pub trait WorkingHoursProvider: Send + Sync {
    /// Working blocks of `staff_id` overlapping `window`, clipped to it.
    async fn blocks(
        &self,
        tenant: &str,
        staff_id: Ulid,
        window: Span,
    ) -> Result<Vec<WorkingHoursBlock>, ScheduleError>;

    /// Every staff member of the tenant that has working hours.
    async fn staff_ids(&self, tenant: &str) -> Result<Vec<Ulid>, ScheduleError>;
}

#[async_trait]
pub trait BusyTimeProvider: Send + Sync {
    /// External calendar blackouts of `staff_id` overlapping `window`.
    async fn busy_times(
        &self,
        tenant: &str,
        staff_id: Ulid,
        window: Span,
    ) -> Result<Vec<Span>, ScheduleError>;
}

#[async_trait]
pub trait BookableFlagProvider: Send + Sync {
    /// `(staff_id, location_id)` pairs explicitly marked not bookable online.
    async fn not_bookable_online(&self, tenant: &str) -> Result<HashSet<(Ulid, Ulid)>, ScheduleError>;
}

/// Weekday of an instant in UTC, Monday = 0.
pub fn weekday(t: Ms) -> u8 {
    // 1970-01-01 was a Thursday.
    (t.div_euclid(crate::limits::DAY_MS) + 3).rem_euclid(7) as u8
}
