use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{ClinicStore, InMemoryStore};
use shared_models::{Branch, Slot, SlotKey};

use crate::clock::FixedClock;

/// Monday 2026-10-19, the reference "today" used across the test suites.
pub fn reference_monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).expect("valid date")
}

pub fn at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0).expect("valid time"))
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
}

pub fn fixed_clock(date: NaiveDate) -> Arc<FixedClock> {
    Arc::new(FixedClock::new(at(date, 8, 0)))
}

pub struct TestConfig {
    pub coverage_window_days: u32,
    pub max_reschedules: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            coverage_window_days: 30,
            max_reschedules: 3,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            coverage_window_days: self.coverage_window_days,
            max_reschedules: self.max_reschedules,
            ..AppConfig::default()
        }
    }
}

pub struct TestBranch;

impl TestBranch {
    pub fn new(id: &str, days: &[&str], opening: Option<&str>, closing: Option<&str>) -> Branch {
        Branch {
            id: id.to_string(),
            name: format!("{} branch", id),
            operating_days: days.iter().map(|day| day.to_string()).collect(),
            opening_time: opening.map(str::to_string),
            closing_time: closing.map(str::to_string),
        }
    }

    /// Mon-Fri, 09:00-12:00: three slots per operating day.
    pub fn weekday_mornings(id: &str) -> Branch {
        Self::new(
            id,
            &["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"],
            Some("09:00"),
            Some("12:00"),
        )
    }
}

/// Inserts an open slot directly, bypassing generation.
pub async fn seed_slot(store: &InMemoryStore, branch_id: &str, date: NaiveDate, hour: u32) -> Slot {
    let slot = Slot::new(
        SlotKey {
            branch_id: branch_id.to_string(),
            date,
            start_time: time(hour, 0),
            end_time: time(hour + 1, 0),
        },
        at(date, 0, 0),
    );

    let mut tx = store.begin().await.expect("begin");
    tx.insert_slot(slot.clone()).await.expect("insert slot");
    tx.commit().await.expect("commit");
    slot
}

pub fn dentist_ids(count: usize) -> Vec<Uuid> {
    (0..count).map(|_| Uuid::new_v4()).collect()
}
