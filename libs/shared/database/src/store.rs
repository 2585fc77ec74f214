use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use shared_models::{Appointment, AppointmentStatus, AuditEntry, DentistSlot, Slot, SlotInterval, SlotKey};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("slot already exists for branch {} on {} {}-{}", .0.branch_id, .0.date, .0.start_time, .0.end_time)]
    DuplicateSlot(SlotKey),

    #[error("dentist {dentist_id} is already linked on {} {}-{}", .interval.date, .interval.start_time, .interval.end_time)]
    DuplicateDentistLink { dentist_id: Uuid, interval: SlotInterval },

    #[error("slot {0} not found")]
    SlotNotFound(Uuid),

    #[error("appointment {0} not found")]
    AppointmentNotFound(Uuid),

    #[error("appointment {0} already exists")]
    DuplicateAppointment(Uuid),

    /// A concurrent writer changed a row this transaction depended on; nothing was applied.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Default)]
pub struct SlotFilter {
    pub branch_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub is_active: Option<bool>,
}

impl SlotFilter {
    pub fn for_branch(branch_id: impl Into<String>) -> Self {
        Self {
            branch_id: Some(branch_id.into()),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    pub fn matches(&self, slot: &Slot) -> bool {
        self.branch_id.as_deref().map_or(true, |id| slot.branch_id == id)
            && self.from.map_or(true, |from| slot.date >= from)
            && self.to.map_or(true, |to| slot.date <= to)
            && self.is_active.map_or(true, |active| slot.is_active == active)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub patient_id: Option<Uuid>,
    pub dentist_id: Option<Uuid>,
    pub branch_id: Option<String>,
    pub slot_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.dentist_id.map_or(true, |id| appointment.dentist_id == id)
            && self.branch_id.as_deref().map_or(true, |id| appointment.branch_id == id)
            && self.slot_id.map_or(true, |id| appointment.slot_id == id)
            && self.status.map_or(true, |status| appointment.status == status)
    }
}

/// Entry point to the scheduling tables.
#[async_trait]
pub trait ClinicStore: Send + Sync {
    /// Opens a transaction. Dropping it without [`StoreTransaction::commit`] discards every change.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One unit of work against the scheduling tables.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get_slot(&mut self, slot_id: Uuid) -> Result<Option<Slot>, StoreError>;

    async fn find_slot(&mut self, key: &SlotKey) -> Result<Option<Slot>, StoreError>;

    /// Ordered by branch, date, then start time.
    async fn list_slots(&mut self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError>;

    async fn insert_slot(&mut self, slot: Slot) -> Result<(), StoreError>;

    /// Compare-and-swap on the availability flag. Returns false, leaving the row
    /// untouched, when the current value is not `expected`.
    async fn set_slot_active(&mut self, slot_id: Uuid, expected: bool, new: bool) -> Result<bool, StoreError>;

    /// Deletes open slots dated strictly before `before`, with their dentist links.
    async fn delete_open_slots_before(
        &mut self,
        before: NaiveDate,
        branch_id: Option<&str>,
    ) -> Result<usize, StoreError>;

    /// Whether the dentist is linked to any slot, at any branch, covering `interval`.
    async fn dentist_linked(&mut self, dentist_id: Uuid, interval: SlotInterval) -> Result<bool, StoreError>;

    async fn insert_dentist_slot(&mut self, link: DentistSlot) -> Result<(), StoreError>;

    async fn list_slot_dentists(&mut self, slot_id: Uuid) -> Result<Vec<DentistSlot>, StoreError>;

    /// Ordered by date, start time, then branch.
    async fn list_dentist_slots(
        &mut self,
        dentist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DentistSlot>, StoreError>;

    async fn get_appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn insert_appointment(&mut self, appointment: Appointment) -> Result<(), StoreError>;

    async fn update_appointment(&mut self, appointment: Appointment) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_appointments(&mut self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError>;

    async fn record_audit(&mut self, entry: AuditEntry) -> Result<(), StoreError>;

    async fn list_audit(&mut self, appointment_id: Uuid) -> Result<Vec<AuditEntry>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
