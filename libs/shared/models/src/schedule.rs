use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every generated slot is exactly this long.
pub const SLOT_DURATION_MINUTES: i64 = 60;

// ==============================================================================
// BRANCH DIRECTORY RECORDS
// ==============================================================================

/// A branch as the directory hands it over. Hours and days are kept raw so that
/// one misconfigured branch can be reported without failing the whole listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Branch {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub operating_days: Vec<String>,
    #[serde(default)]
    pub opening_time: Option<String>,
    #[serde(default)]
    pub closing_time: Option<String>,
}

/// Dentist to branch assignment as reported by the roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DentistAssignment {
    pub id: Uuid,
    pub branch_id: String,
}

/// Set of weekdays a branch accepts appointments on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OperatingDays(u8);

impl OperatingDays {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn includes_date(&self, date: NaiveDate) -> bool {
        self.contains(date.weekday())
    }

    /// Accepts full or abbreviated English day names in any case.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        let mut days = Self::none();
        for name in names {
            let name = name.as_ref().trim();
            let day = Weekday::from_str(name)
                .map_err(|_| format!("unknown operating day '{}'", name))?;
            days.insert(day);
        }
        Ok(days)
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .filter(|day| self.contains(*day))
    }
}

impl FromIterator<Weekday> for OperatingDays {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut days = Self::none();
        for day in iter {
            days.insert(day);
        }
        days
    }
}

impl fmt::Display for OperatingDays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|day| day.to_string()).collect();
        write!(f, "{}", names.join(","))
    }
}

// ==============================================================================
// SLOTS
// ==============================================================================

/// Logical identity of a slot. Matching and idempotence go through this, never the row id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub branch_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub branch_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// true = open for booking, false = held by an appointment
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Slot {
    pub fn new(key: SlotKey, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            branch_id: key.branch_id,
            date: key.date,
            start_time: key.start_time,
            end_time: key.end_time,
            is_active: true,
            created_at,
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey {
            branch_id: self.branch_id.clone(),
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }

    pub fn interval(&self) -> SlotInterval {
        SlotInterval {
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Wall-clock hour a dentist is linked for. A dentist holds at most one link per
/// interval, whichever branch it is at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotInterval {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// A dentist marked as available to staff a slot. Does not affect the slot's availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DentistSlot {
    pub id: Uuid,
    pub dentist_id: Uuid,
    pub slot_id: Uuid,
    pub branch_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub created_at: DateTime<Utc>,
}

impl DentistSlot {
    pub fn for_slot(dentist_id: Uuid, slot: &Slot, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dentist_id,
            slot_id: slot.id,
            branch_id: slot.branch_id.clone(),
            date: slot.date,
            start_time: slot.start_time,
            end_time: slot.end_time,
            created_at,
        }
    }

    pub fn interval(&self) -> SlotInterval {
        SlotInterval {
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}
