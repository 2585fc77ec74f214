use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_models::{Appointment, AppointmentStatus};

use crate::models::{AppointmentError, MIN_REASON_LENGTH};

/// Business rules for moving an appointment through its statuses.
#[derive(Debug, Clone)]
pub struct AppointmentLifecycleRules {
    pub max_reschedule_count: u32,
    pub min_reason_length: usize,
}

impl Default for AppointmentLifecycleRules {
    fn default() -> Self {
        Self {
            max_reschedule_count: 3,
            min_reason_length: MIN_REASON_LENGTH,
        }
    }
}

impl AppointmentLifecycleRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_reschedule_count: config.max_reschedules,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentLifecycleService {
    rules: AppointmentLifecycleRules,
}

impl AppointmentLifecycleService {
    pub fn new(rules: AppointmentLifecycleRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &AppointmentLifecycleRules {
        &self.rules
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::CheckedIn,
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::CheckedIn => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow => vec![],
        }
    }

    /// Only a still-scheduled appointment under the cap may move to another slot.
    pub fn validate_reschedule(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        if appointment.status != AppointmentStatus::Scheduled {
            warn!(
                "Reschedule rejected for appointment {} in status {}",
                appointment.id, appointment.status
            );
            return Err(AppointmentError::InvalidStatusTransition {
                from: appointment.status,
                to: AppointmentStatus::Scheduled,
            });
        }

        if appointment.reschedule_count >= self.rules.max_reschedule_count {
            warn!(
                "Reschedule rejected for appointment {}: already moved {} times",
                appointment.id, appointment.reschedule_count
            );
            return Err(AppointmentError::RescheduleLimitReached {
                limit: self.rules.max_reschedule_count,
            });
        }

        Ok(())
    }

    /// Trims the reason and enforces the minimum length when the target status needs one.
    pub fn validate_reason(
        &self,
        target: AppointmentStatus,
        reason: Option<&str>,
    ) -> Result<Option<String>, AppointmentError> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());

        match reason {
            Some(r) if target.requires_reason() && r.chars().count() < self.rules.min_reason_length => {
                Err(AppointmentError::ValidationError(format!(
                    "Reason must be at least {} characters",
                    self.rules.min_reason_length
                )))
            }
            None if target.requires_reason() => Err(AppointmentError::ValidationError(format!(
                "A reason is required to mark an appointment as {}",
                target
            ))),
            other => Ok(other.map(str::to_string)),
        }
    }
}
