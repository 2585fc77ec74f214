use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use tracing::{error, info};

use schedule_cell::CoverageMaintainer;
use shared_utils::time::clinic_now;
use shared_utils::Clock;

/// First instant strictly after `now` at which the clinic-local wall clock reads `run_time`.
pub fn next_run_after(now: DateTime<Utc>, run_time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local = clinic_now(now, offset);

    let mut candidate = local.date().and_time(run_time);
    if candidate <= local {
        candidate += Duration::days(1);
    }

    Utc.from_utc_datetime(&(candidate - Duration::seconds(i64::from(offset.local_minus_utc()))))
}

/// Runs coverage once at startup, then every day at `run_time` clinic-local.
/// A failed run is logged and the next one happens at the following trigger.
pub async fn run_daily(
    maintainer: Arc<CoverageMaintainer>,
    clock: Arc<dyn Clock>,
    run_time: NaiveTime,
    offset: FixedOffset,
) {
    loop {
        match maintainer.run_now(None).await {
            Ok(report) => info!(
                "Daily coverage for {}: {} deleted, {} created, {} failed branches",
                report.run_date,
                report.slots_deleted,
                report.slots_created,
                report.failures.len()
            ),
            Err(e) => error!("Daily coverage run failed: {}", e),
        }

        let now = clock.now();
        let next = next_run_after(now, run_time, offset);
        info!("Next coverage run at {}", next);

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
    }
}
