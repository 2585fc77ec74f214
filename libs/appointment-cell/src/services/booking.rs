use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{AppointmentFilter, ClinicStore, StoreError, StoreTransaction};
use shared_models::{Appointment, AppointmentStatus, AuditAction, AuditEntry, Slot};
use shared_utils::time::clinic_now;
use shared_utils::Clock;

use crate::models::{
    AppointmentError, AppointmentNotification, BookAppointmentRequest, CancelAppointmentRequest,
    NotificationEvent, RescheduleAppointmentRequest, UpdateStatusRequest,
};
use crate::services::lifecycle::{AppointmentLifecycleRules, AppointmentLifecycleService};
use crate::services::notification::AppointmentNotifier;

/// Arbitrates slot occupancy as appointments are booked, moved, cancelled and closed out.
///
/// Every operation runs in one store transaction. Slot availability only ever changes
/// through a compare-and-swap on `is_active`, so two requests racing for the same slot
/// cannot both win. Any error, including a notification veto or timeout, drops the
/// transaction and leaves slots and appointment exactly as they were.
pub struct AppointmentBookingService {
    store: Arc<dyn ClinicStore>,
    notifier: Arc<dyn AppointmentNotifier>,
    clock: Arc<dyn Clock>,
    lifecycle_service: AppointmentLifecycleService,
    utc_offset: FixedOffset,
    notification_timeout: Duration,
}

impl AppointmentBookingService {
    pub fn new(
        store: Arc<dyn ClinicStore>,
        notifier: Arc<dyn AppointmentNotifier>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            lifecycle_service: AppointmentLifecycleService::new(AppointmentLifecycleRules::from_config(config)),
            utc_offset: config.clinic_utc_offset,
            notification_timeout: Duration::from_secs(config.notification_timeout_secs),
        }
    }

    /// Books an open slot. Fails with `SlotNotAvailable` if another appointment got there first.
    #[instrument(skip(self, request), fields(slot_id = %request.slot_id, patient_id = %request.patient_id))]
    pub async fn claim_slot(&self, request: BookAppointmentRequest) -> Result<Appointment, AppointmentError> {
        info!("Booking slot {} for patient {} with dentist {}", request.slot_id, request.patient_id, request.dentist_id);

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let slot = self
            .bookable_slot(tx.as_mut(), request.slot_id, request.dentist_id, now)
            .await?;
        claim(tx.as_mut(), &slot).await?;

        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            dentist_id: request.dentist_id,
            slot_id: slot.id,
            branch_id: slot.branch_id.clone(),
            status: AppointmentStatus::Scheduled,
            reschedule_count: 0,
            status_changed_by: request.booked_by.clone(),
            status_changed_at: Some(now),
            reason_for_status_change: None,
            billing_id: request.billing_id,
            notes: request.notes.clone(),
            created_at: now,
            updated_at: now,
        };

        tx.insert_appointment(appointment.clone()).await?;
        let entry = audit_entry(&appointment, AuditAction::Booked, None, now);
        tx.record_audit(entry.clone()).await?;
        commit_claim(tx).await?;

        log_audit(&entry);
        info!("Appointment {} booked on slot {}", appointment.id, slot.id);
        Ok(appointment)
    }

    /// Moves a scheduled appointment to another open slot, releasing the one it held.
    #[instrument(skip(self, request), fields(new_slot_id = %request.new_slot_id))]
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        info!("Rescheduling appointment {} to slot {}", appointment_id, request.new_slot_id);

        let reason = self
            .lifecycle_service
            .validate_reason(AppointmentStatus::Scheduled, request.reason.as_deref())?;

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let current = load_appointment(tx.as_mut(), appointment_id).await?;
        self.lifecycle_service.validate_reschedule(&current)?;

        if current.slot_id == request.new_slot_id {
            return Err(AppointmentError::ValidationError(
                "Appointment already holds the requested slot".to_string(),
            ));
        }

        let new_slot = self
            .bookable_slot(tx.as_mut(), request.new_slot_id, current.dentist_id, now)
            .await?;
        claim(tx.as_mut(), &new_slot).await?;
        release(tx.as_mut(), current.slot_id).await?;

        let mut updated = current.clone();
        updated.slot_id = new_slot.id;
        updated.branch_id = new_slot.branch_id.clone();
        updated.reschedule_count += 1;
        updated.status_changed_by = request.changed_by.clone();
        updated.status_changed_at = Some(now);
        updated.reason_for_status_change = reason;
        updated.updated_at = now;

        tx.update_appointment(updated.clone()).await?;
        let entry = audit_entry(&updated, AuditAction::Rescheduled, Some(&current), now);
        tx.record_audit(entry.clone()).await?;

        self.notify(
            AppointmentNotification::for_appointment(NotificationEvent::Rescheduled, &updated, Some(current.slot_id), now),
        )
        .await?;

        commit_claim(tx).await?;

        log_audit(&entry);
        info!(
            "Appointment {} moved from slot {} to {} ({} of {} reschedules used)",
            updated.id,
            current.slot_id,
            updated.slot_id,
            updated.reschedule_count,
            self.lifecycle_service.rules().max_reschedule_count
        );
        Ok(updated)
    }

    /// Cancels a non-terminal appointment and reopens its slot.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.transition(
            appointment_id,
            AppointmentStatus::Cancelled,
            Some(&request.reason),
            request.cancelled_by,
        )
        .await
    }

    /// Cancellation on behalf of the booking workflow, with no named actor.
    pub async fn release_slot(&self, appointment_id: Uuid, reason: &str) -> Result<Appointment, AppointmentError> {
        self.transition(appointment_id, AppointmentStatus::Cancelled, Some(reason), None)
            .await
    }

    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        request: UpdateStatusRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.transition(appointment_id, request.status, request.reason.as_deref(), request.changed_by)
            .await
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let mut tx = self.store.begin().await?;
        load_appointment(tx.as_mut(), appointment_id).await
    }

    /// Newest first.
    pub async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        let mut tx = self.store.begin().await?;
        let appointments = tx.list_appointments(filter).await?;
        debug!("Found {} appointments", appointments.len());
        Ok(appointments)
    }

    /// Audit trail of an appointment, oldest first.
    pub async fn appointment_history(&self, appointment_id: Uuid) -> Result<Vec<AuditEntry>, AppointmentError> {
        let mut tx = self.store.begin().await?;
        load_appointment(tx.as_mut(), appointment_id).await?;
        Ok(tx.list_audit(appointment_id).await?)
    }

    #[instrument(skip(self, reason, changed_by))]
    async fn transition(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        reason: Option<&str>,
        changed_by: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let reason = self.lifecycle_service.validate_reason(new_status, reason)?;

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let current = load_appointment(tx.as_mut(), appointment_id).await?;
        self.lifecycle_service
            .validate_status_transition(current.status, new_status)?;

        if new_status.releases_slot() {
            release(tx.as_mut(), current.slot_id).await?;
        }

        let mut updated = current.clone();
        updated.status = new_status;
        updated.status_changed_by = changed_by;
        updated.status_changed_at = Some(now);
        updated.reason_for_status_change = reason;
        updated.updated_at = now;

        tx.update_appointment(updated.clone()).await?;
        let action = match new_status {
            AppointmentStatus::Cancelled => AuditAction::Cancelled,
            _ => AuditAction::StatusChanged,
        };
        let entry = audit_entry(&updated, action, Some(&current), now);
        tx.record_audit(entry.clone()).await?;

        let event = match new_status {
            AppointmentStatus::Cancelled => Some(NotificationEvent::Cancelled),
            AppointmentStatus::NoShow => Some(NotificationEvent::NoShow),
            _ => None,
        };
        if let Some(event) = event {
            self.notify(AppointmentNotification::for_appointment(event, &updated, None, now))
                .await?;
        }

        tx.commit().await?;

        log_audit(&entry);
        info!("Appointment {} moved from {} to {}", updated.id, current.status, updated.status);
        Ok(updated)
    }

    /// Loads a slot a given dentist may book right now.
    async fn bookable_slot(
        &self,
        tx: &mut dyn StoreTransaction,
        slot_id: Uuid,
        dentist_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Slot, AppointmentError> {
        let slot = tx
            .get_slot(slot_id)
            .await?
            .ok_or(AppointmentError::SlotNotFound(slot_id))?;

        if slot.date.and_time(slot.start_time) < clinic_now(now, self.utc_offset) {
            return Err(AppointmentError::ValidationError(format!(
                "Slot {} on {} at {} is in the past",
                slot.id,
                slot.date,
                slot.start_time.format("%H:%M")
            )));
        }

        let linked = tx
            .list_slot_dentists(slot.id)
            .await?
            .iter()
            .any(|link| link.dentist_id == dentist_id);
        if !linked {
            warn!("Dentist {} is not linked to slot {}", dentist_id, slot.id);
            return Err(AppointmentError::DentistNotAssigned { dentist_id, slot_id });
        }

        Ok(slot)
    }

    /// The store transaction is still open here, so the notifier gets a hard deadline.
    async fn notify(&self, notification: AppointmentNotification) -> Result<(), AppointmentError> {
        let outcome = tokio::time::timeout(self.notification_timeout, self.notifier.notify(&notification))
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("no answer within {:?}", self.notification_timeout)));

        outcome.map_err(|e| {
            warn!(
                "Notification for appointment {} failed, rolling back: {}",
                notification.appointment_id, e
            );
            AppointmentError::NotificationFailed(e.to_string())
        })
    }
}

async fn load_appointment(tx: &mut dyn StoreTransaction, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
    tx.get_appointment(appointment_id)
        .await?
        .ok_or(AppointmentError::NotFound)
}

/// A write conflict while committing a claim means another request took the slot first.
async fn commit_claim(tx: Box<dyn StoreTransaction>) -> Result<(), AppointmentError> {
    tx.commit().await.map_err(|e| match e {
        StoreError::Conflict(detail) => {
            warn!("Slot claim lost at commit: {}", detail);
            AppointmentError::SlotNotAvailable
        }
        other => other.into(),
    })
}

/// Open -> Held.
async fn claim(tx: &mut dyn StoreTransaction, slot: &Slot) -> Result<(), AppointmentError> {
    if !tx.set_slot_active(slot.id, true, false).await? {
        warn!("Slot {} is already held", slot.id);
        return Err(AppointmentError::SlotNotAvailable);
    }
    Ok(())
}

/// Held -> Open.
async fn release(tx: &mut dyn StoreTransaction, slot_id: Uuid) -> Result<(), AppointmentError> {
    if !tx.set_slot_active(slot_id, false, true).await? {
        return Err(AppointmentError::DatabaseError(format!(
            "slot {} was expected to be held but is open",
            slot_id
        )));
    }
    debug!("Slot {} released", slot_id);
    Ok(())
}

fn snapshot(appointment: &Appointment) -> Value {
    serde_json::to_value(appointment).unwrap_or(Value::Null)
}

fn audit_entry(
    after: &Appointment,
    action: AuditAction,
    before: Option<&Appointment>,
    recorded_at: DateTime<Utc>,
) -> AuditEntry {
    AuditEntry {
        id: Uuid::new_v4(),
        appointment_id: after.id,
        action,
        before: before.map(snapshot),
        after: snapshot(after),
        changed_by: after.status_changed_by.clone(),
        recorded_at,
    }
}

fn log_audit(entry: &AuditEntry) {
    info!(
        target: "audit",
        appointment_id = %entry.appointment_id,
        action = %entry.action,
        changed_by = entry.changed_by.as_deref().unwrap_or("system"),
        before = ?entry.before,
        after = %entry.after,
        "appointment state changed"
    );
}
