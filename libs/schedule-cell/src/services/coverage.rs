use std::sync::Arc;

use chrono::{Days, FixedOffset, NaiveDate};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use shared_config::{AppConfig, GenerationPolicy};
use shared_database::{ClinicStore, StoreTransaction};
use shared_models::Branch;
use shared_utils::time::clinic_today;
use shared_utils::Clock;

use crate::models::{BranchFailure, BranchReport, CoverageReport, GenerationOutcome, ScheduleError};
use crate::services::directory::{BranchDirectory, DentistRoster};
use crate::services::generator::SlotGenerator;

/// Keeps a rolling window of bookable slots in place for every branch.
///
/// A run prunes open slots dated before the run date, then generates the window
/// `[today, today + window_days - 1]` for each branch (or one targeted branch).
/// How failures are contained depends on [`GenerationPolicy`].
pub struct CoverageMaintainer {
    store: Arc<dyn ClinicStore>,
    directory: Arc<dyn BranchDirectory>,
    roster: Arc<dyn DentistRoster>,
    clock: Arc<dyn Clock>,
    generator: SlotGenerator,
    window_days: u32,
    utc_offset: FixedOffset,
    policy: GenerationPolicy,
}

impl CoverageMaintainer {
    pub fn new(
        store: Arc<dyn ClinicStore>,
        directory: Arc<dyn BranchDirectory>,
        roster: Arc<dyn DentistRoster>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            directory,
            roster,
            clock,
            generator: SlotGenerator::default(),
            window_days: config.coverage_window_days,
            utc_offset: config.clinic_utc_offset,
            policy: config.generation_policy,
        }
    }

    /// Clinic-local date according to the injected clock.
    pub fn today(&self) -> NaiveDate {
        clinic_today(self.clock.now(), self.utc_offset)
    }

    /// Runs against the clock's current clinic-local date.
    pub async fn run_now(&self, branch_id: Option<&str>) -> Result<CoverageReport, ScheduleError> {
        self.run(self.today(), branch_id).await
    }

    #[instrument(skip(self), fields(policy = ?self.policy))]
    pub async fn run(&self, today: NaiveDate, branch_id: Option<&str>) -> Result<CoverageReport, ScheduleError> {
        let window_end = self.window_end(today)?;
        let branches = self.target_branches(branch_id).await?;

        info!(
            "Coverage run for {}: window {}..={} across {} branches",
            today,
            today,
            window_end,
            branches.len()
        );

        let mut report = CoverageReport::new(today, today, window_end);

        let result = match self.policy {
            GenerationPolicy::PerBranch => self.run_per_branch(&mut report, branches, branch_id).await,
            GenerationPolicy::AllOrNothing => self.run_all_or_nothing(&mut report, branches, branch_id).await,
        };

        if let Err(e) = result {
            error!("Coverage run for {} rolled back: {}", today, e);
            return Err(e);
        }

        if report.is_complete() {
            info!(
                "Coverage run for {} complete: {} slots deleted, {} created, {} dentist links",
                today, report.slots_deleted, report.slots_created, report.dentist_links_created
            );
        } else {
            warn!(
                "Coverage run for {} finished with {} failed branches: {} slots deleted, {} created",
                today,
                report.failures.len(),
                report.slots_deleted,
                report.slots_created
            );
        }

        Ok(report)
    }

    fn window_end(&self, today: NaiveDate) -> Result<NaiveDate, ScheduleError> {
        if self.window_days == 0 {
            return Err(ScheduleError::ValidationError(
                "coverage window must span at least one day".to_string(),
            ));
        }

        today
            .checked_add_days(Days::new(u64::from(self.window_days - 1)))
            .ok_or_else(|| ScheduleError::ValidationError(format!("coverage window from {} overflows the calendar", today)))
    }

    async fn target_branches(&self, branch_id: Option<&str>) -> Result<Vec<Branch>, ScheduleError> {
        match branch_id {
            Some(id) => {
                let branch = self
                    .directory
                    .get_branch(id)
                    .await?
                    .ok_or_else(|| ScheduleError::BranchNotFound(id.to_string()))?;
                Ok(vec![branch])
            }
            None => {
                let mut branches = self.directory.list_branches().await?;
                branches.sort_by(|a, b| a.id.cmp(&b.id));
                Ok(branches)
            }
        }
    }

    async fn generate_branch(
        &self,
        tx: &mut dyn StoreTransaction,
        branch: &Branch,
        roster: &[Uuid],
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> Result<GenerationOutcome, ScheduleError> {
        self.generator
            .generate(tx, branch, roster, window_start, window_end, self.clock.now())
            .await
    }

    async fn run_per_branch(
        &self,
        report: &mut CoverageReport,
        branches: Vec<Branch>,
        scope: Option<&str>,
    ) -> Result<(), ScheduleError> {
        let mut tx = self.store.begin().await?;
        report.slots_deleted = tx.delete_open_slots_before(report.run_date, scope).await?;
        tx.commit().await?;

        for branch in branches {
            match self.run_branch(&branch, report.window_start, report.window_end).await {
                Ok(branch_report) => report.record_branch(branch_report),
                Err(e) => {
                    warn!("Skipping branch {}: {}", branch.id, e);
                    report.failures.push(BranchFailure {
                        branch_id: branch.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// One branch in its own transaction; an error drops the transaction.
    async fn run_branch(
        &self,
        branch: &Branch,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> Result<BranchReport, ScheduleError> {
        let roster = self.roster.list_dentists_for_branch(&branch.id).await?;

        let mut tx = self.store.begin().await?;
        let outcome = self
            .generate_branch(tx.as_mut(), branch, &roster, window_start, window_end)
            .await?;
        tx.commit().await?;

        Ok(branch_report(branch, &outcome, roster.len()))
    }

    async fn run_all_or_nothing(
        &self,
        report: &mut CoverageReport,
        branches: Vec<Branch>,
        scope: Option<&str>,
    ) -> Result<(), ScheduleError> {
        // Rosters are read up front so no collaborator I/O happens while the store is locked.
        let mut rosters = Vec::with_capacity(branches.len());
        for branch in &branches {
            rosters.push(self.roster.list_dentists_for_branch(&branch.id).await?);
        }

        let mut tx = self.store.begin().await?;
        let slots_deleted = tx.delete_open_slots_before(report.run_date, scope).await?;

        let mut branch_reports = Vec::with_capacity(branches.len());
        for (branch, roster) in branches.iter().zip(&rosters) {
            let outcome = self
                .generate_branch(tx.as_mut(), branch, roster, report.window_start, report.window_end)
                .await?;
            branch_reports.push(branch_report(branch, &outcome, roster.len()));
        }

        tx.commit().await?;

        report.slots_deleted = slots_deleted;
        for branch_report in branch_reports {
            report.record_branch(branch_report);
        }
        Ok(())
    }
}

fn branch_report(branch: &Branch, outcome: &GenerationOutcome, dentists_on_roster: usize) -> BranchReport {
    BranchReport {
        branch_id: branch.id.clone(),
        slots_created: outcome.slots_created,
        slots_existing: outcome.slots_existing,
        dentist_links_created: outcome.dentist_links_created,
        dentists_on_roster,
    }
}
