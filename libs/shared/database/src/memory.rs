use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use shared_models::{Appointment, AuditEntry, DentistSlot, Slot, SlotInterval, SlotKey};

use crate::store::{AppointmentFilter, ClinicStore, SlotFilter, StoreError, StoreTransaction};

#[derive(Debug, Default, Clone)]
struct Tables {
    slots: HashMap<Uuid, Slot>,
    slot_keys: HashMap<SlotKey, Uuid>,
    dentist_slots: HashMap<Uuid, DentistSlot>,
    dentist_keys: HashSet<(Uuid, SlotInterval)>,
    appointments: HashMap<Uuid, Appointment>,
    audit: Vec<AuditEntry>,
}

impl Tables {
    fn remove_slot(&mut self, slot_id: Uuid) -> Option<Slot> {
        let slot = self.slots.remove(&slot_id)?;
        self.slot_keys.remove(&slot.key());

        let orphaned: Vec<Uuid> = self
            .dentist_slots
            .values()
            .filter(|link| link.slot_id == slot_id)
            .map(|link| link.id)
            .collect();
        for link_id in orphaned {
            if let Some(link) = self.dentist_slots.remove(&link_id) {
                self.dentist_keys.remove(&(link.dentist_id, link.interval()));
            }
        }

        Some(slot)
    }
}

/// Process-local store with serializable transactions.
///
/// A transaction holds the table lock from `begin` until it is committed or dropped and
/// works on a private copy, so concurrent writers queue up behind each other and an
/// abandoned transaction leaves no trace.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClinicStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn get_slot(&mut self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        Ok(self.working.slots.get(&slot_id).cloned())
    }

    async fn find_slot(&mut self, key: &SlotKey) -> Result<Option<Slot>, StoreError> {
        Ok(self
            .working
            .slot_keys
            .get(key)
            .and_then(|id| self.working.slots.get(id))
            .cloned())
    }

    async fn list_slots(&mut self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError> {
        let mut slots: Vec<Slot> = self
            .working
            .slots
            .values()
            .filter(|slot| filter.matches(slot))
            .cloned()
            .collect();
        slots.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(slots)
    }

    async fn insert_slot(&mut self, slot: Slot) -> Result<(), StoreError> {
        let key = slot.key();
        if self.working.slot_keys.contains_key(&key) {
            return Err(StoreError::DuplicateSlot(key));
        }
        self.working.slot_keys.insert(key, slot.id);
        self.working.slots.insert(slot.id, slot);
        Ok(())
    }

    async fn set_slot_active(&mut self, slot_id: Uuid, expected: bool, new: bool) -> Result<bool, StoreError> {
        let slot = self
            .working
            .slots
            .get_mut(&slot_id)
            .ok_or(StoreError::SlotNotFound(slot_id))?;

        if slot.is_active != expected {
            debug!("CAS on slot {} failed: expected is_active={}, found {}", slot_id, expected, slot.is_active);
            return Ok(false);
        }

        slot.is_active = new;
        Ok(true)
    }

    async fn delete_open_slots_before(
        &mut self,
        before: NaiveDate,
        branch_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let stale: Vec<Uuid> = self
            .working
            .slots
            .values()
            .filter(|slot| slot.is_active && slot.date < before)
            .filter(|slot| branch_id.map_or(true, |id| slot.branch_id == id))
            .map(|slot| slot.id)
            .collect();

        for slot_id in &stale {
            self.working.remove_slot(*slot_id);
        }

        Ok(stale.len())
    }

    async fn dentist_linked(&mut self, dentist_id: Uuid, interval: SlotInterval) -> Result<bool, StoreError> {
        Ok(self.working.dentist_keys.contains(&(dentist_id, interval)))
    }

    async fn insert_dentist_slot(&mut self, link: DentistSlot) -> Result<(), StoreError> {
        if !self.working.slots.contains_key(&link.slot_id) {
            return Err(StoreError::SlotNotFound(link.slot_id));
        }

        let index_key = (link.dentist_id, link.interval());
        if self.working.dentist_keys.contains(&index_key) {
            return Err(StoreError::DuplicateDentistLink {
                dentist_id: link.dentist_id,
                interval: link.interval(),
            });
        }

        self.working.dentist_keys.insert(index_key);
        self.working.dentist_slots.insert(link.id, link);
        Ok(())
    }

    async fn list_slot_dentists(&mut self, slot_id: Uuid) -> Result<Vec<DentistSlot>, StoreError> {
        let mut links: Vec<DentistSlot> = self
            .working
            .dentist_slots
            .values()
            .filter(|link| link.slot_id == slot_id)
            .cloned()
            .collect();
        links.sort_by_key(|link| link.dentist_id);
        Ok(links)
    }

    async fn list_dentist_slots(
        &mut self,
        dentist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DentistSlot>, StoreError> {
        let mut links: Vec<DentistSlot> = self
            .working
            .dentist_slots
            .values()
            .filter(|link| link.dentist_id == dentist_id && link.date >= from && link.date <= to)
            .cloned()
            .collect();
        links.sort_by(|a, b| {
            (a.date, a.start_time, &a.branch_id).cmp(&(b.date, b.start_time, &b.branch_id))
        });
        Ok(links)
    }

    async fn get_appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.working.appointments.get(&appointment_id).cloned())
    }

    async fn insert_appointment(&mut self, appointment: Appointment) -> Result<(), StoreError> {
        if self.working.appointments.contains_key(&appointment.id) {
            return Err(StoreError::DuplicateAppointment(appointment.id));
        }
        self.working.appointments.insert(appointment.id, appointment);
        Ok(())
    }

    async fn update_appointment(&mut self, appointment: Appointment) -> Result<(), StoreError> {
        match self.working.appointments.get_mut(&appointment.id) {
            Some(existing) => {
                *existing = appointment;
                Ok(())
            }
            None => Err(StoreError::AppointmentNotFound(appointment.id)),
        }
    }

    async fn list_appointments(&mut self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError> {
        let mut appointments: Vec<Appointment> = self
            .working
            .appointments
            .values()
            .filter(|appointment| filter.matches(appointment))
            .cloned()
            .collect();
        appointments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(appointments)
    }

    async fn record_audit(&mut self, entry: AuditEntry) -> Result<(), StoreError> {
        self.working.audit.push(entry);
        Ok(())
    }

    async fn list_audit(&mut self, appointment_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .working
            .audit
            .iter()
            .filter(|entry| entry.appointment_id == appointment_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
