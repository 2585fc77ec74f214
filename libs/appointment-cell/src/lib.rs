pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::appointment_routes;
pub use services::booking::AppointmentBookingService;
pub use services::lifecycle::{AppointmentLifecycleRules, AppointmentLifecycleService};
pub use services::notification::{notifier_from_config, AppointmentNotifier, LogNotifier, WebhookNotifier};
