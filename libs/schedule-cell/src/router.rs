use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{self, ScheduleState};

pub fn schedule_routes(state: Arc<ScheduleState>) -> Router {
    Router::new()
        .route("/generate", post(handlers::generate_schedules))
        .route("/branches/{branch_id}/slots", get(handlers::get_branch_slots))
        .route("/dentists/{dentist_id}/slots", get(handlers::get_dentist_slots))
        .with_state(state)
}
