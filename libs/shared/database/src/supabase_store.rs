use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{Appointment, AuditEntry, DentistSlot, Slot, SlotInterval, SlotKey};

use crate::store::{AppointmentFilter, ClinicStore, SlotFilter, StoreError, StoreTransaction};
use crate::supabase::{PostgrestError, SupabaseClient};

const COMMIT_PATH: &str = "/rest/v1/rpc/apply_clinic_changes";

/// Scheduling tables behind PostgREST.
///
/// Reads go straight to the tables. Writes are buffered in the transaction and shipped
/// in one `apply_clinic_changes` call on commit, which runs them inside a single Postgres
/// transaction. Slot flips and appointment updates carry the value they were read with;
/// if another writer got there first the whole batch is refused with HTTP 409 and surfaces
/// as [`StoreError::Conflict`].
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    supabase: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }
}

#[async_trait]
impl ClinicStore for SupabaseStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(SupabaseTransaction::new(self.supabase.clone())))
    }
}

/// One buffered write. Serialized as the `changes` array the commit function consumes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Change {
    InsertSlot { slot: Slot },
    SetSlotActive { slot_id: Uuid, expected: bool, new: bool },
    DeleteOpenSlots { slot_ids: Vec<Uuid> },
    InsertDentistSlot { link: DentistSlot },
    InsertAppointment { appointment: Appointment },
    UpdateAppointment {
        appointment: Appointment,
        expected_updated_at: Option<DateTime<Utc>>,
    },
    RecordAudit { entry: AuditEntry },
}

struct SupabaseTransaction {
    supabase: SupabaseClient,
    changes: Vec<Change>,
    new_slots: HashMap<Uuid, Slot>,
    slot_active: HashMap<Uuid, bool>,
    deleted_slots: HashSet<Uuid>,
    new_links: Vec<DentistSlot>,
    appointments: HashMap<Uuid, Appointment>,
    /// `updated_at` of appointments as last read from the server.
    appointment_versions: HashMap<Uuid, DateTime<Utc>>,
    audit: Vec<AuditEntry>,
}

fn backend(e: anyhow::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn commit_error(e: anyhow::Error) -> StoreError {
    match e.downcast_ref::<PostgrestError>() {
        Some(err) if err.status() == StatusCode::CONFLICT => StoreError::Conflict(err.body().to_string()),
        _ => backend(e),
    }
}

impl SupabaseTransaction {
    fn new(supabase: SupabaseClient) -> Self {
        Self {
            supabase,
            changes: Vec::new(),
            new_slots: HashMap::new(),
            slot_active: HashMap::new(),
            deleted_slots: HashSet::new(),
            new_links: Vec::new(),
            appointments: HashMap::new(),
            appointment_versions: HashMap::new(),
            audit: Vec::new(),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, StoreError> {
        self.supabase
            .request(Method::GET, path, None, None)
            .await
            .map_err(backend)
    }

    /// Applies this transaction's pending flips and deletions to a row read from the server.
    fn overlay_slot(&self, mut slot: Slot) -> Option<Slot> {
        if self.deleted_slots.contains(&slot.id) {
            return None;
        }
        if let Some(active) = self.slot_active.get(&slot.id) {
            slot.is_active = *active;
        }
        Some(slot)
    }

    fn pending_slot(&self, slot_id: Uuid) -> Option<Slot> {
        self.new_slots
            .get(&slot_id)
            .cloned()
            .and_then(|slot| self.overlay_slot(slot))
    }

    fn link_is_live(&self, link: &DentistSlot) -> bool {
        !self.deleted_slots.contains(&link.slot_id)
    }

    fn remember_versions(&mut self, appointments: &[Appointment]) {
        for appointment in appointments {
            self.appointment_versions
                .entry(appointment.id)
                .or_insert(appointment.updated_at);
        }
    }
}

fn slot_filter_query(filter: &SlotFilter) -> String {
    let mut query = String::from("select=*&order=branch_id.asc,date.asc,start_time.asc,end_time.asc");
    if let Some(branch_id) = &filter.branch_id {
        query.push_str(&format!("&branch_id=eq.{}", urlencoding::encode(branch_id)));
    }
    if let Some(from) = filter.from {
        query.push_str(&format!("&date=gte.{}", from));
    }
    if let Some(to) = filter.to {
        query.push_str(&format!("&date=lte.{}", to));
    }
    if let Some(active) = filter.is_active {
        query.push_str(&format!("&is_active=eq.{}", active));
    }
    query
}

fn appointment_filter_query(filter: &AppointmentFilter) -> String {
    let mut query = String::from("select=*&order=created_at.desc,id.asc");
    if let Some(patient_id) = filter.patient_id {
        query.push_str(&format!("&patient_id=eq.{}", patient_id));
    }
    if let Some(dentist_id) = filter.dentist_id {
        query.push_str(&format!("&dentist_id=eq.{}", dentist_id));
    }
    if let Some(branch_id) = &filter.branch_id {
        query.push_str(&format!("&branch_id=eq.{}", urlencoding::encode(branch_id)));
    }
    if let Some(slot_id) = filter.slot_id {
        query.push_str(&format!("&slot_id=eq.{}", slot_id));
    }
    if let Some(status) = filter.status {
        query.push_str(&format!("&status=eq.{}", status));
    }
    query
}

#[async_trait]
impl StoreTransaction for SupabaseTransaction {
    async fn get_slot(&mut self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        if self.new_slots.contains_key(&slot_id) {
            return Ok(self.pending_slot(slot_id));
        }

        let path = format!("/rest/v1/slots?id=eq.{}&select=*", slot_id);
        let rows: Vec<Slot> = self.fetch(&path).await?;
        Ok(rows.into_iter().next().and_then(|slot| self.overlay_slot(slot)))
    }

    async fn find_slot(&mut self, key: &SlotKey) -> Result<Option<Slot>, StoreError> {
        if let Some(slot) = self.new_slots.values().find(|slot| slot.key() == *key) {
            return Ok(self.pending_slot(slot.id));
        }

        let path = format!(
            "/rest/v1/slots?branch_id=eq.{}&date=eq.{}&start_time=eq.{}&end_time=eq.{}&select=*",
            urlencoding::encode(&key.branch_id),
            key.date,
            key.start_time,
            key.end_time
        );
        let rows: Vec<Slot> = self.fetch(&path).await?;
        Ok(rows.into_iter().next().and_then(|slot| self.overlay_slot(slot)))
    }

    async fn list_slots(&mut self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError> {
        // Availability is matched locally so rows flipped in this transaction still qualify.
        let server_filter = SlotFilter {
            is_active: None,
            ..filter.clone()
        };
        let path = format!("/rest/v1/slots?{}", slot_filter_query(&server_filter));
        let rows: Vec<Slot> = self.fetch(&path).await?;

        let pending: Vec<Slot> = self
            .new_slots
            .keys()
            .filter_map(|id| self.pending_slot(*id))
            .collect();

        let mut slots: Vec<Slot> = rows
            .into_iter()
            .filter_map(|slot| self.overlay_slot(slot))
            .chain(pending)
            .filter(|slot| filter.matches(slot))
            .collect();
        slots.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(slots)
    }

    async fn insert_slot(&mut self, slot: Slot) -> Result<(), StoreError> {
        let key = slot.key();
        if self.find_slot(&key).await?.is_some() {
            return Err(StoreError::DuplicateSlot(key));
        }

        self.changes.push(Change::InsertSlot { slot: slot.clone() });
        self.new_slots.insert(slot.id, slot);
        Ok(())
    }

    async fn set_slot_active(&mut self, slot_id: Uuid, expected: bool, new: bool) -> Result<bool, StoreError> {
        let slot = self
            .get_slot(slot_id)
            .await?
            .ok_or(StoreError::SlotNotFound(slot_id))?;

        if slot.is_active != expected {
            debug!("CAS on slot {} failed: expected is_active={}, found {}", slot_id, expected, slot.is_active);
            return Ok(false);
        }

        self.slot_active.insert(slot_id, new);
        self.changes.push(Change::SetSlotActive { slot_id, expected, new });
        Ok(true)
    }

    async fn delete_open_slots_before(
        &mut self,
        before: NaiveDate,
        branch_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let Some(last_day) = before.pred_opt() else {
            return Ok(0);
        };

        let filter = SlotFilter {
            branch_id: branch_id.map(str::to_string),
            from: None,
            to: Some(last_day),
            is_active: Some(true),
        };
        let stale: Vec<Uuid> = self.list_slots(&filter).await?.into_iter().map(|slot| slot.id).collect();
        if stale.is_empty() {
            return Ok(0);
        }

        for slot_id in &stale {
            self.deleted_slots.insert(*slot_id);
            self.new_slots.remove(slot_id);
        }
        self.new_links.retain(|link| !stale.contains(&link.slot_id));
        self.changes.push(Change::DeleteOpenSlots { slot_ids: stale.clone() });

        Ok(stale.len())
    }

    async fn dentist_linked(&mut self, dentist_id: Uuid, interval: SlotInterval) -> Result<bool, StoreError> {
        if self
            .new_links
            .iter()
            .any(|link| link.dentist_id == dentist_id && link.interval() == interval)
        {
            return Ok(true);
        }

        let path = format!(
            "/rest/v1/dentist_slots?dentist_id=eq.{}&date=eq.{}&start_time=eq.{}&end_time=eq.{}&select=*",
            dentist_id, interval.date, interval.start_time, interval.end_time
        );
        let rows: Vec<DentistSlot> = self.fetch(&path).await?;
        Ok(rows.iter().any(|link| self.link_is_live(link)))
    }

    async fn insert_dentist_slot(&mut self, link: DentistSlot) -> Result<(), StoreError> {
        if self.get_slot(link.slot_id).await?.is_none() {
            return Err(StoreError::SlotNotFound(link.slot_id));
        }

        if self.dentist_linked(link.dentist_id, link.interval()).await? {
            return Err(StoreError::DuplicateDentistLink {
                dentist_id: link.dentist_id,
                interval: link.interval(),
            });
        }

        self.changes.push(Change::InsertDentistSlot { link: link.clone() });
        self.new_links.push(link);
        Ok(())
    }

    async fn list_slot_dentists(&mut self, slot_id: Uuid) -> Result<Vec<DentistSlot>, StoreError> {
        if self.deleted_slots.contains(&slot_id) {
            return Ok(Vec::new());
        }

        let path = format!("/rest/v1/dentist_slots?slot_id=eq.{}&select=*&order=dentist_id.asc", slot_id);
        let mut links: Vec<DentistSlot> = self.fetch(&path).await?;
        links.extend(self.new_links.iter().filter(|link| link.slot_id == slot_id).cloned());
        links.sort_by_key(|link| link.dentist_id);
        Ok(links)
    }

    async fn list_dentist_slots(
        &mut self,
        dentist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DentistSlot>, StoreError> {
        let path = format!(
            "/rest/v1/dentist_slots?dentist_id=eq.{}&date=gte.{}&date=lte.{}&select=*&order=date.asc,start_time.asc,branch_id.asc",
            dentist_id, from, to
        );
        let rows: Vec<DentistSlot> = self.fetch(&path).await?;

        let pending = self
            .new_links
            .iter()
            .filter(|link| link.dentist_id == dentist_id && link.date >= from && link.date <= to)
            .cloned();

        let mut links: Vec<DentistSlot> = rows
            .into_iter()
            .filter(|link| self.link_is_live(link))
            .chain(pending)
            .collect();
        links.sort_by(|a, b| {
            (a.date, a.start_time, &a.branch_id).cmp(&(b.date, b.start_time, &b.branch_id))
        });
        Ok(links)
    }

    async fn get_appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        if let Some(appointment) = self.appointments.get(&appointment_id) {
            return Ok(Some(appointment.clone()));
        }

        let path = format!("/rest/v1/appointments?id=eq.{}&select=*", appointment_id);
        let rows: Vec<Appointment> = self.fetch(&path).await?;
        self.remember_versions(&rows);
        Ok(rows.into_iter().next())
    }

    async fn insert_appointment(&mut self, appointment: Appointment) -> Result<(), StoreError> {
        if self.get_appointment(appointment.id).await?.is_some() {
            return Err(StoreError::DuplicateAppointment(appointment.id));
        }

        self.changes.push(Change::InsertAppointment {
            appointment: appointment.clone(),
        });
        self.appointments.insert(appointment.id, appointment);
        Ok(())
    }

    async fn update_appointment(&mut self, appointment: Appointment) -> Result<(), StoreError> {
        if self.get_appointment(appointment.id).await?.is_none() {
            return Err(StoreError::AppointmentNotFound(appointment.id));
        }

        // A second update in the same transaction replaces the first so the guard still
        // compares against the row as it was read.
        let pending = self.changes.iter_mut().find_map(|change| match change {
            Change::UpdateAppointment { appointment: queued, .. } if queued.id == appointment.id => Some(queued),
            _ => None,
        });
        match pending {
            Some(queued) => *queued = appointment.clone(),
            None => self.changes.push(Change::UpdateAppointment {
                appointment: appointment.clone(),
                expected_updated_at: self.appointment_versions.get(&appointment.id).copied(),
            }),
        }

        self.appointments.insert(appointment.id, appointment);
        Ok(())
    }

    async fn list_appointments(&mut self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError> {
        let path = format!("/rest/v1/appointments?{}", appointment_filter_query(filter));
        let rows: Vec<Appointment> = self.fetch(&path).await?;
        self.remember_versions(&rows);

        let local: Vec<Appointment> = self.appointments.values().cloned().collect();
        let mut appointments: Vec<Appointment> = rows
            .into_iter()
            .filter(|appointment| !self.appointments.contains_key(&appointment.id))
            .chain(local)
            .filter(|appointment| filter.matches(appointment))
            .collect();
        appointments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(appointments)
    }

    async fn record_audit(&mut self, entry: AuditEntry) -> Result<(), StoreError> {
        self.changes.push(Change::RecordAudit { entry: entry.clone() });
        self.audit.push(entry);
        Ok(())
    }

    async fn list_audit(&mut self, appointment_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        let path = format!(
            "/rest/v1/appointment_audit?appointment_id=eq.{}&select=*&order=recorded_at.asc",
            appointment_id
        );
        let mut entries: Vec<AuditEntry> = self.fetch(&path).await?;
        entries.extend(
            self.audit
                .iter()
                .filter(|entry| entry.appointment_id == appointment_id)
                .cloned(),
        );
        Ok(entries)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.changes.is_empty() {
            return Ok(());
        }

        let body = json!({ "changes": self.changes });
        let applied: i64 = match self
            .supabase
            .request(Method::POST, COMMIT_PATH, None, Some(body))
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                let err = commit_error(e);
                warn!("Commit of {} changes refused: {}", self.changes.len(), err);
                return Err(err);
            }
        };

        info!("Committed {} scheduling changes", applied);
        Ok(())
    }
}
