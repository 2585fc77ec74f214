pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::ScheduleState;
pub use models::*;
pub use router::schedule_routes;
pub use services::assignment::DentistAssignmentResolver;
pub use services::coverage::CoverageMaintainer;
pub use services::directory::{BranchDirectory, DentistRoster, DirectorySeed, StaticDirectory, SupabaseDirectory};
pub use services::generator::SlotGenerator;
pub use services::slots::SlotQueryService;
