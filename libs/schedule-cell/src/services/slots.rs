use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, instrument};
use uuid::Uuid;

use shared_database::{ClinicStore, SlotFilter};
use shared_models::Slot;

use crate::models::{DentistScheduleEntry, ScheduleError};

/// Read side of the slot tables, used by booking screens and dentist calendars.
#[derive(Clone)]
pub struct SlotQueryService {
    store: Arc<dyn ClinicStore>,
}

fn validate_range(from: NaiveDate, to: NaiveDate) -> Result<(), ScheduleError> {
    if from > to {
        return Err(ScheduleError::ValidationError(format!(
            "'from' ({}) must not be after 'to' ({})",
            from, to
        )));
    }
    Ok(())
}

impl SlotQueryService {
    pub fn new(store: Arc<dyn ClinicStore>) -> Self {
        Self { store }
    }

    /// Slots for a branch in `[from, to]`, ordered by date then start time.
    #[instrument(skip(self))]
    pub async fn list_slots(
        &self,
        branch_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        available_only: bool,
    ) -> Result<Vec<Slot>, ScheduleError> {
        validate_range(from, to)?;

        let mut filter = SlotFilter::for_branch(branch_id).between(from, to);
        if available_only {
            filter = filter.active(true);
        }

        let mut tx = self.store.begin().await?;
        let slots = tx.list_slots(&filter).await?;

        debug!("Found {} slots for branch {} between {} and {}", slots.len(), branch_id, from, to);
        Ok(slots)
    }

    /// Every slot a dentist is linked to in `[from, to]`, with its current availability.
    #[instrument(skip(self))]
    pub async fn dentist_schedule(
        &self,
        dentist_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DentistScheduleEntry>, ScheduleError> {
        validate_range(from, to)?;

        let mut tx = self.store.begin().await?;
        let links = tx.list_dentist_slots(dentist_id, from, to).await?;

        let mut entries = Vec::with_capacity(links.len());
        for link in links {
            let Some(slot) = tx.get_slot(link.slot_id).await? else {
                continue;
            };
            entries.push(DentistScheduleEntry {
                slot_id: slot.id,
                branch_id: slot.branch_id,
                date: slot.date,
                start_time: slot.start_time,
                end_time: slot.end_time,
                is_active: slot.is_active,
            });
        }

        debug!("Dentist {} has {} linked slots between {} and {}", dentist_id, entries.len(), from, to);
        Ok(entries)
    }
}
