use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::{AppointmentFilter, StoreError};
use shared_models::AppointmentStatus;

pub use shared_models::{Appointment, AuditAction, AuditEntry};

/// Shortest free-text reason accepted for a cancellation or no-show.
pub const MIN_REASON_LENGTH: usize = 3;

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub slot_id: Uuid,
    pub patient_id: Uuid,
    pub dentist_id: Uuid,
    pub notes: Option<String>,
    pub billing_id: Option<Uuid>,
    pub booked_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_slot_id: Uuid,
    pub reason: Option<String>,
    pub changed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
    pub cancelled_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub changed_by: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub patient_id: Option<Uuid>,
    pub dentist_id: Option<Uuid>,
    pub branch_id: Option<String>,
    pub slot_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
}

impl From<AppointmentSearchQuery> for AppointmentFilter {
    fn from(query: AppointmentSearchQuery) -> Self {
        AppointmentFilter {
            patient_id: query.patient_id,
            dentist_id: query.dentist_id,
            branch_id: query.branch_id,
            slot_id: query.slot_id,
            status: query.status,
        }
    }
}

// ==============================================================================
// NOTIFICATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    Cancelled,
    Rescheduled,
    NoShow,
}

/// Payload handed to the notification collaborator while the transition is still uncommitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentNotification {
    pub event: NotificationEvent,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub dentist_id: Uuid,
    pub branch_id: String,
    pub slot_id: Uuid,
    pub previous_slot_id: Option<Uuid>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AppointmentNotification {
    pub fn for_appointment(
        event: NotificationEvent,
        appointment: &Appointment,
        previous_slot_id: Option<Uuid>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event,
            appointment_id: appointment.id,
            patient_id: appointment.patient_id,
            dentist_id: appointment.dentist_id,
            branch_id: appointment.branch_id.clone(),
            slot_id: appointment.slot_id,
            previous_slot_id,
            reason: appointment.reason_for_status_change.clone(),
            occurred_at,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Slot not found: {0}")]
    SlotNotFound(Uuid),

    #[error("Appointment slot not available")]
    SlotNotAvailable,

    #[error("Appointment has already been rescheduled the maximum of {limit} times")]
    RescheduleLimitReached { limit: u32 },

    #[error("Cannot move appointment from {from} to {to}")]
    InvalidStatusTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Dentist {dentist_id} is not assigned to slot {slot_id}")]
    DentistNotAssigned { dentist_id: Uuid, slot_id: Uuid },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Notification failed: {0}")]
    NotificationFailed(String),

    #[error("Appointment was changed concurrently: {0}")]
    ConcurrentModification(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<StoreError> for AppointmentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AppointmentNotFound(_) => AppointmentError::NotFound,
            StoreError::SlotNotFound(id) => AppointmentError::SlotNotFound(id),
            StoreError::Conflict(detail) => AppointmentError::ConcurrentModification(detail),
            other => AppointmentError::DatabaseError(other.to_string()),
        }
    }
}
