use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Wall-clock reading at the clinic for the given instant.
pub fn clinic_now(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    now.with_timezone(&offset).naive_local()
}

/// Clinic-local calendar date for the given instant.
pub fn clinic_today(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    clinic_now(now, offset).date()
}

pub fn default_opening_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

pub fn default_closing_time() -> NaiveTime {
    NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Parses a wall-clock time written as `HH:MM` or `HH:MM:SS`.
pub fn parse_clinic_time(raw: &str) -> Result<NaiveTime, String> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| format!("'{}' is not a valid time (expected HH:MM or HH:MM:SS)", trimmed))
}

/// Like [`parse_clinic_time`], but a missing or blank value yields `default`.
pub fn parse_clinic_time_or(raw: Option<&str>, default: NaiveTime) -> Result<NaiveTime, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => parse_clinic_time(value),
    }
}
