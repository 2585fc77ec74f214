use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::{info, warn};

use appointment_cell::{appointment_routes, notifier_from_config, AppointmentBookingService};
use schedule_cell::{
    schedule_routes, BranchDirectory, CoverageMaintainer, DentistRoster, ScheduleState, SlotQueryService,
    StaticDirectory, SupabaseDirectory,
};
use shared_config::AppConfig;
use shared_database::{ClinicStore, InMemoryStore, SupabaseStore};
use shared_utils::{Clock, SystemClock};

/// Everything the routers and the daily trigger share.
pub struct AppServices {
    pub maintainer: Arc<CoverageMaintainer>,
    pub slots: SlotQueryService,
    pub booking: Arc<AppointmentBookingService>,
    pub clock: Arc<dyn Clock>,
}

impl AppServices {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let (directory, roster) = directory_from_config(config)?;
        Self::new(config, store_from_config(config), directory, roster, Arc::new(SystemClock))
    }

    pub fn new(
        config: &AppConfig,
        store: Arc<dyn ClinicStore>,
        directory: Arc<dyn BranchDirectory>,
        roster: Arc<dyn DentistRoster>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let maintainer = CoverageMaintainer::new(store.clone(), directory, roster, clock.clone(), config);
        let booking = AppointmentBookingService::new(store.clone(), notifier_from_config(config)?, clock.clone(), config);

        Ok(Self {
            maintainer: Arc::new(maintainer),
            slots: SlotQueryService::new(store),
            booking: Arc::new(booking),
            clock,
        })
    }
}

/// Scheduling tables live in Supabase when configured. Otherwise they are kept in process,
/// which is only fit for the seed-file mode and tests.
fn store_from_config(config: &AppConfig) -> Arc<dyn ClinicStore> {
    if config.is_supabase_configured() {
        info!("Storing slots and appointments in Supabase at {}", config.supabase_url);
        return Arc::new(SupabaseStore::new(config));
    }

    warn!("Supabase is not configured, slots and appointments are kept in memory and lost on restart");
    Arc::new(InMemoryStore::new())
}

/// Supabase when configured, then the seed file, then an empty directory.
fn directory_from_config(config: &AppConfig) -> anyhow::Result<(Arc<dyn BranchDirectory>, Arc<dyn DentistRoster>)> {
    if config.is_supabase_configured() {
        info!("Reading branches and dentists from Supabase at {}", config.supabase_url);
        let directory = Arc::new(SupabaseDirectory::new(config));
        let branches: Arc<dyn BranchDirectory> = directory.clone();
        let roster: Arc<dyn DentistRoster> = directory;
        return Ok((branches, roster));
    }

    let directory = match &config.branch_seed_path {
        Some(path) => StaticDirectory::from_json_file(path)?,
        None => {
            warn!("No branch directory configured, coverage runs will have nothing to generate");
            StaticDirectory::default()
        }
    };
    let directory = Arc::new(directory);
    let branches: Arc<dyn BranchDirectory> = directory.clone();
    let roster: Arc<dyn DentistRoster> = directory;
    Ok((branches, roster))
}

pub fn create_router(services: AppServices) -> Router {
    let schedule_state = Arc::new(ScheduleState {
        maintainer: services.maintainer,
        slots: services.slots,
    });

    Router::new()
        .route("/", get(|| async { "Dental clinic scheduling API is running!" }))
        .nest("/schedules", schedule_routes(schedule_state))
        .nest("/appointments", appointment_routes(services.booking))
}
