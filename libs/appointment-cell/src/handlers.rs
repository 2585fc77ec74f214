use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_database::AppointmentFilter;
use shared_models::error::AppError;

use crate::models::{
    AppointmentError, AppointmentSearchQuery, BookAppointmentRequest, CancelAppointmentRequest,
    RescheduleAppointmentRequest, UpdateStatusRequest,
};
use crate::services::booking::AppointmentBookingService;

fn appointment_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::SlotNotFound(id) => AppError::NotFound(format!("Slot not found: {}", id)),
        AppointmentError::SlotNotAvailable => {
            AppError::Conflict("Appointment slot no longer available".to_string())
        }
        AppointmentError::RescheduleLimitReached { .. } => AppError::LimitExceeded(e.to_string()),
        AppointmentError::InvalidStatusTransition { .. } => AppError::BadRequest(e.to_string()),
        AppointmentError::DentistNotAssigned { .. } => AppError::BadRequest(e.to_string()),
        AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
        AppointmentError::NotificationFailed(msg) => AppError::ExternalService(msg),
        AppointmentError::ConcurrentModification(_) => AppError::Conflict(e.to_string()),
        AppointmentError::DatabaseError(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(service): State<Arc<AppointmentBookingService>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = service.claim_slot(request).await.map_err(appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(service): State<Arc<AppointmentBookingService>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = service
        .get_appointment(appointment_id)
        .await
        .map_err(appointment_error)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn get_appointment_history(
    State(service): State<Arc<AppointmentBookingService>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let history = service
        .appointment_history(appointment_id)
        .await
        .map_err(appointment_error)?;

    Ok(Json(json!({
        "appointment_id": appointment_id,
        "history": history
    })))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(service): State<Arc<AppointmentBookingService>>,
    Query(query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = AppointmentFilter::from(query);
    let appointments = service
        .list_appointments(&filter)
        .await
        .map_err(appointment_error)?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(service): State<Arc<AppointmentBookingService>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = service
        .reschedule(appointment_id, request)
        .await
        .map_err(appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(service): State<Arc<AppointmentBookingService>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = service
        .cancel_appointment(appointment_id, request)
        .await
        .map_err(appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled successfully"
    })))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(service): State<Arc<AppointmentBookingService>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = service
        .update_status(appointment_id, request)
        .await
        .map_err(appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": format!("Appointment marked as {}", appointment.status)
    })))
}
