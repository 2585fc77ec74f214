use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How the coverage run treats a branch whose generation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPolicy {
    /// Every branch commits in its own transaction; failures are reported, not fatal.
    PerBranch,
    /// One transaction for the whole run; any failure rolls everything back.
    AllOrNothing,
}

impl FromStr for GenerationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_branch" | "per-branch" => Ok(GenerationPolicy::PerBranch),
            "all_or_nothing" | "all-or-nothing" => Ok(GenerationPolicy::AllOrNothing),
            other => Err(format!("unknown generation policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub branch_seed_path: Option<PathBuf>,
    pub clinic_utc_offset: FixedOffset,
    pub coverage_window_days: u32,
    pub coverage_run_time: NaiveTime,
    pub generation_policy: GenerationPolicy,
    pub max_reschedules: u32,
    pub notification_webhook_url: Option<String>,
    /// Upper bound on one notification attempt, in seconds.
    pub notification_timeout_secs: u64,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            branch_seed_path: None,
            clinic_utc_offset: utc_offset(),
            coverage_window_days: 30,
            coverage_run_time: NaiveTime::from_hms_opt(0, 5, 0).unwrap_or(NaiveTime::MIN),
            generation_policy: GenerationPolicy::PerBranch,
            max_reschedules: 3,
            notification_webhook_url: None,
            notification_timeout_secs: 5,
            server_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            branch_seed_path: env::var("BRANCH_SEED_PATH").ok().map(PathBuf::from),
            clinic_utc_offset: parse_or_default("CLINIC_UTC_OFFSET", parse_utc_offset, defaults.clinic_utc_offset),
            coverage_window_days: parse_or_default(
                "COVERAGE_WINDOW_DAYS",
                |raw| match raw.trim().parse::<u32>() {
                    Ok(0) => Err("window must be at least one day".to_string()),
                    Ok(days) => Ok(days),
                    Err(e) => Err(e.to_string()),
                },
                defaults.coverage_window_days,
            ),
            coverage_run_time: parse_or_default(
                "COVERAGE_RUN_TIME",
                |raw| NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| e.to_string()),
                defaults.coverage_run_time,
            ),
            generation_policy: parse_or_default("GENERATION_POLICY", |raw| raw.parse(), defaults.generation_policy),
            max_reschedules: parse_or_default(
                "MAX_RESCHEDULES",
                |raw| raw.trim().parse::<u32>().map_err(|e| e.to_string()),
                defaults.max_reschedules,
            ),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL").ok().filter(|url| !url.trim().is_empty()),
            notification_timeout_secs: parse_or_default(
                "NOTIFICATION_TIMEOUT_SECS",
                |raw| match raw.trim().parse::<u64>() {
                    Ok(0) => Err("timeout must be at least one second".to_string()),
                    Ok(secs) => Ok(secs),
                    Err(e) => Err(e.to_string()),
                },
                defaults.notification_timeout_secs,
            ),
            server_port: parse_or_default(
                "SERVER_PORT",
                |raw| raw.trim().parse::<u16>().map_err(|e| e.to_string()),
                defaults.server_port,
            ),
        };

        if !config.is_supabase_configured() && config.branch_seed_path.is_none() {
            warn!("Neither Supabase nor BRANCH_SEED_PATH configured - branch directory will be empty");
        }

        config
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// Parses offsets written as `+08:00`, `-05:30` or `Z`.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, String> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Ok(utc_offset());
    }

    let (sign, rest) = match raw.chars().next() {
        Some('+') => (1, &raw[1..]),
        Some('-') => (-1, &raw[1..]),
        _ => return Err(format!("offset '{}' must start with + or -", raw)),
    };

    let (hours, minutes) = rest
        .split_once(':')
        .ok_or_else(|| format!("offset '{}' must look like +HH:MM", raw))?;
    let hours: i32 = hours.parse().map_err(|_| format!("invalid hours in offset '{}'", raw))?;
    let minutes: i32 = minutes.parse().map_err(|_| format!("invalid minutes in offset '{}'", raw))?;

    if hours > 14 || minutes > 59 {
        return Err(format!("offset '{}' out of range", raw));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| format!("offset '{}' out of range", raw))
}

fn parse_or_default<T, F>(key: &str, parse: F, default: T) -> T
where
    F: Fn(&str) -> Result<T, String>,
{
    match env::var(key) {
        Ok(raw) => parse(&raw).unwrap_or_else(|e| {
            warn!("{} is invalid ({}), using default", key, e);
            default
        }),
        Err(_) => default,
    }
}
