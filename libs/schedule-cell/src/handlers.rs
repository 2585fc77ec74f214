use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{GenerateSchedulesRequest, ScheduleError};
use crate::services::coverage::CoverageMaintainer;
use crate::services::slots::SlotQueryService;

pub struct ScheduleState {
    pub maintainer: Arc<CoverageMaintainer>,
    pub slots: SlotQueryService,
}

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct BranchSlotsQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default)]
    pub available_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct DentistSlotsQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

fn schedule_error(e: ScheduleError) -> AppError {
    match e {
        ScheduleError::Configuration { .. } => AppError::Configuration(e.to_string()),
        ScheduleError::BranchNotFound(id) => AppError::NotFound(format!("Branch not found: {}", id)),
        ScheduleError::ValidationError(msg) => AppError::ValidationError(msg),
        ScheduleError::DirectoryError(msg) => AppError::ExternalService(msg),
        ScheduleError::DatabaseError(msg) => AppError::Database(msg),
    }
}

// ==============================================================================
// HANDLERS
// ==============================================================================

/// On-demand coverage run for every branch, or one branch when `branch_id` is given.
#[axum::debug_handler]
pub async fn generate_schedules(
    State(state): State<Arc<ScheduleState>>,
    request: Option<Json<GenerateSchedulesRequest>>,
) -> Result<Json<Value>, AppError> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let report = state
        .maintainer
        .run_now(request.branch_id.as_deref())
        .await
        .map_err(schedule_error)?;

    let message = if report.is_complete() {
        "Schedule generation completed".to_string()
    } else {
        format!("Schedule generation completed with {} failed branches", report.failures.len())
    };

    Ok(Json(json!({
        "success": report.is_complete(),
        "report": report,
        "message": message
    })))
}

#[axum::debug_handler]
pub async fn get_branch_slots(
    State(state): State<Arc<ScheduleState>>,
    Path(branch_id): Path<String>,
    Query(query): Query<BranchSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state
        .slots
        .list_slots(&branch_id, query.from, query.to, query.available_only)
        .await
        .map_err(schedule_error)?;

    Ok(Json(json!({
        "branch_id": branch_id,
        "total": slots.len(),
        "slots": slots
    })))
}

#[axum::debug_handler]
pub async fn get_dentist_slots(
    State(state): State<Arc<ScheduleState>>,
    Path(dentist_id): Path<Uuid>,
    Query(query): Query<DentistSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let entries = state
        .slots
        .dentist_schedule(dentist_id, query.from, query.to)
        .await
        .map_err(schedule_error)?;

    Ok(Json(json!({
        "dentist_id": dentist_id,
        "total": entries.len(),
        "slots": entries
    })))
}
