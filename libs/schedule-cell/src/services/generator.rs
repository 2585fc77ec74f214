use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use shared_database::StoreTransaction;
use shared_models::{Branch, Slot, SlotKey};

use crate::models::{BranchSchedule, GenerationOutcome, ScheduleError};
use crate::services::assignment::DentistAssignmentResolver;

/// Creates the one-hour slots a branch should have over a date range.
///
/// Generation is idempotent: a slot is only inserted when no slot with the same
/// (branch, date, start, end) exists. Dates are walked in ascending order and
/// intervals within a day from opening to closing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlotGenerator {
    resolver: DentistAssignmentResolver,
}

impl SlotGenerator {
    pub fn new(resolver: DentistAssignmentResolver) -> Self {
        Self { resolver }
    }

    #[instrument(skip(self, tx, branch, roster), fields(branch_id = %branch.id))]
    pub async fn generate(
        &self,
        tx: &mut dyn StoreTransaction,
        branch: &Branch,
        roster: &[Uuid],
        from: NaiveDate,
        to: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<GenerationOutcome, ScheduleError> {
        if from > to {
            return Err(ScheduleError::ValidationError(format!(
                "generation range start {} is after end {}",
                from, to
            )));
        }

        let schedule = BranchSchedule::from_branch(branch)?;
        let intervals = schedule.intervals();

        if schedule.operating_days.is_empty() {
            warn!("Branch {} has no operating days, nothing to generate", branch.id);
        }
        if intervals.is_empty() {
            warn!(
                "Branch {} opens {}-{}, too short for a single slot",
                branch.id, schedule.opening_time, schedule.closing_time
            );
        }

        let mut outcome = GenerationOutcome::default();

        for date in from.iter_days().take_while(|date| *date <= to) {
            if !schedule.is_operating_on(date) {
                continue;
            }

            for (start_time, end_time) in &intervals {
                let key = SlotKey {
                    branch_id: branch.id.clone(),
                    date,
                    start_time: *start_time,
                    end_time: *end_time,
                };

                let slot = match tx.find_slot(&key).await? {
                    Some(existing) => {
                        outcome.slots_existing += 1;
                        existing
                    }
                    None => {
                        let slot = Slot::new(key, now);
                        tx.insert_slot(slot.clone()).await?;
                        outcome.slots_created += 1;
                        slot
                    }
                };

                outcome.dentist_links_created += self.resolver.assign(tx, &slot, roster, now).await?;
            }
        }

        debug!(
            "Branch {} generation {}..{}: {} created, {} already present, {} dentist links",
            branch.id, from, to, outcome.slots_created, outcome.slots_existing, outcome.dentist_links_created
        );

        Ok(outcome)
    }
}
