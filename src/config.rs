//! Application configuration.
//!
//! Loaded from environment variables with sensible defaults, in the same
//! spirit as the rest of the platform: missing variables mean defaults, a
//! missing classifier key means keyword-only screening.

use std::path::PathBuf;

use crate::matching::MatchWeights;

/// Default starting balance for a newly onboarded user.
const DEFAULT_STARTING_POINTS: i64 = 100;
/// Allowed stake range for a task.
const DEFAULT_STAKE_MIN: i64 = 10;
const DEFAULT_STAKE_MAX: i64 = 500;
/// Days an in-progress task may sit unconfirmed before the sweep settles it.
const DEFAULT_GRACE_DAYS: i64 = 5;
/// Cadence of the background expiry sweep.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
/// Locality credit for opted-in cross-campus matches.
const DEFAULT_CROSS_CAMPUS_CREDIT: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API binds to.
    pub bind_addr: String,
    /// SQLite database path.
    pub database_path: PathBuf,
    /// API key for the semantic risk classifier; keyword-only when unset.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub starting_points: i64,
    pub stake_min: i64,
    pub stake_max: i64,
    pub grace_days: i64,
    pub sweep_interval_secs: u64,
    pub match_weights: MatchWeights,
    pub cross_campus_credit: f64,
    /// Seed demo users and tasks into an empty ledger on startup.
    pub seed_demo: bool,
}

impl Config {
    /// Build a configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("TASKBANK_BIND_ADDR", "127.0.0.1:8080"),
            database_path: PathBuf::from(env_or("TASKBANK_DB_PATH", "taskbank.db")),
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            gemini_model: env_or("GEMINI_MODEL", "gemini-2.0-flash"),
            starting_points: env_parsed("TASKBANK_STARTING_POINTS", DEFAULT_STARTING_POINTS),
            stake_min: env_parsed("TASKBANK_STAKE_MIN", DEFAULT_STAKE_MIN),
            stake_max: env_parsed("TASKBANK_STAKE_MAX", DEFAULT_STAKE_MAX),
            grace_days: env_parsed("TASKBANK_GRACE_DAYS", DEFAULT_GRACE_DAYS),
            sweep_interval_secs: env_parsed(
                "TASKBANK_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            ),
            match_weights: MatchWeights::default(),
            cross_campus_credit: env_parsed(
                "TASKBANK_CROSS_CAMPUS_CREDIT",
                DEFAULT_CROSS_CAMPUS_CREDIT,
            ),
            seed_demo: std::env::var("TASKBANK_SEED_DEMO").map(|v| v == "1").unwrap_or(false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            database_path: PathBuf::from("taskbank.db"),
            gemini_api_key: None,
            gemini_model: "gemini-2.0-flash".into(),
            starting_points: DEFAULT_STARTING_POINTS,
            stake_min: DEFAULT_STAKE_MIN,
            stake_max: DEFAULT_STAKE_MAX,
            grace_days: DEFAULT_GRACE_DAYS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            match_weights: MatchWeights::default(),
            cross_campus_credit: DEFAULT_CROSS_CAMPUS_CREDIT,
            seed_demo: false,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
