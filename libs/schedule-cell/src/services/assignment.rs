use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use shared_database::StoreTransaction;
use shared_models::{DentistSlot, Slot};

use crate::models::ScheduleError;

/// Links a branch's roster dentists to a slot, skipping any dentist already linked
/// to the same wall-clock interval at this or any other branch.
#[derive(Debug, Default, Clone, Copy)]
pub struct DentistAssignmentResolver;

impl DentistAssignmentResolver {
    pub fn new() -> Self {
        Self
    }

    /// Returns the number of links created. An empty roster is not an error.
    pub async fn assign(
        &self,
        tx: &mut dyn StoreTransaction,
        slot: &Slot,
        roster: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<usize, ScheduleError> {
        let interval = slot.interval();
        let mut created = 0;

        for dentist_id in roster {
            if tx.dentist_linked(*dentist_id, interval).await? {
                continue;
            }

            tx.insert_dentist_slot(DentistSlot::for_slot(*dentist_id, slot, now)).await?;
            created += 1;
        }

        if created > 0 {
            debug!(
                "Linked {} dentists to slot {} ({} {}-{})",
                created, slot.id, slot.date, slot.start_time, slot.end_time
            );
        }

        Ok(created)
    }
}
