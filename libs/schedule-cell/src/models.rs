use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::{Branch, OperatingDays, SLOT_DURATION_MINUTES};
use shared_utils::time::{default_closing_time, default_opening_time, parse_clinic_time_or};

// ==============================================================================
// VALIDATED BRANCH HOURS
// ==============================================================================

/// A branch's operating days and hours after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSchedule {
    pub branch_id: String,
    pub operating_days: OperatingDays,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
}

impl BranchSchedule {
    /// Missing hours fall back to 09:00-17:00; malformed or inverted hours are a configuration error.
    pub fn from_branch(branch: &Branch) -> Result<Self, ScheduleError> {
        let misconfigured = |message: String| ScheduleError::Configuration {
            branch_id: branch.id.clone(),
            message,
        };

        let operating_days = OperatingDays::from_names(&branch.operating_days).map_err(misconfigured)?;

        let opening_time = parse_clinic_time_or(branch.opening_time.as_deref(), default_opening_time())
            .map_err(|e| misconfigured(format!("opening time: {}", e)))?;
        let closing_time = parse_clinic_time_or(branch.closing_time.as_deref(), default_closing_time())
            .map_err(|e| misconfigured(format!("closing time: {}", e)))?;

        if closing_time <= opening_time {
            return Err(misconfigured(format!(
                "closing time {} is not after opening time {}",
                closing_time.format("%H:%M"),
                opening_time.format("%H:%M")
            )));
        }

        Ok(Self {
            branch_id: branch.id.clone(),
            operating_days,
            opening_time,
            closing_time,
        })
    }

    /// Back-to-back one-hour intervals starting at opening; a trailing partial hour is dropped.
    pub fn intervals(&self) -> Vec<(NaiveTime, NaiveTime)> {
        let step = Duration::minutes(SLOT_DURATION_MINUTES);
        let closing_secs = i64::from(self.closing_time.num_seconds_from_midnight());

        let mut intervals = Vec::new();
        let mut start = self.opening_time;
        // compare in seconds so an interval can never wrap past midnight
        while i64::from(start.num_seconds_from_midnight()) + step.num_seconds() <= closing_secs {
            let end = start + step;
            intervals.push((start, end));
            start = end;
        }
        intervals
    }

    pub fn is_operating_on(&self, date: NaiveDate) -> bool {
        self.operating_days.includes_date(date)
    }
}

// ==============================================================================
// RUN REPORTS
// ==============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub slots_created: usize,
    pub slots_existing: usize,
    pub dentist_links_created: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchReport {
    pub branch_id: String,
    pub slots_created: usize,
    pub slots_existing: usize,
    pub dentist_links_created: usize,
    pub dentists_on_roster: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFailure {
    pub branch_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub run_date: NaiveDate,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub slots_deleted: usize,
    pub slots_created: usize,
    pub dentist_links_created: usize,
    pub branches: Vec<BranchReport>,
    pub failures: Vec<BranchFailure>,
}

impl CoverageReport {
    pub fn new(run_date: NaiveDate, window_start: NaiveDate, window_end: NaiveDate) -> Self {
        Self {
            run_date,
            window_start,
            window_end,
            slots_deleted: 0,
            slots_created: 0,
            dentist_links_created: 0,
            branches: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_branch(&mut self, report: BranchReport) {
        self.slots_created += report.slots_created;
        self.dentist_links_created += report.dentist_links_created;
        self.branches.push(report);
    }
}

// ==============================================================================
// REQUEST/RESPONSE DTOs
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateSchedulesRequest {
    pub branch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DentistScheduleEntry {
    pub slot_id: Uuid,
    pub branch_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Branch {branch_id} is misconfigured: {message}")]
    Configuration { branch_id: String, message: String },

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Directory error: {0}")]
    DirectoryError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<StoreError> for ScheduleError {
    fn from(e: StoreError) -> Self {
        ScheduleError::DatabaseError(e.to_string())
    }
}
