//! Runtime configuration, read from the environment with the original
//! system's literal defaults as fallbacks. Mirrors the split the teacher
//! crate's own `db::DbConfig` uses: a `Default` impl that reads `env::var`
//! with `unwrap_or_else`, plus a thin `load()` entrypoint that also does
//! `dotenvy::dotenv().ok()`.

use std::time::Duration;

/// Hourly counter rows expire 48h after their bucket start.
pub const COUNTERS_TTL_HOURS: i64 = 48;
/// Version-conflict retries budget for the optimistic-concurrency loop.
pub const VERSION_CONFLICT_RETRIES: u32 = 3;
/// Max ids per `BatchWriteItem`/group-delete message.
pub const GROUP_DELETE_LIMIT: usize = 25;

const DAY_SECONDS: i64 = 24 * 60 * 60;
const HOUR_SECONDS: i64 = 60 * 60;

/// TTL policy for the bidirectional romance row, keyed by the vote-type
/// pair after a mutation (see `domain::Romance`'s TTL table).
#[derive(Debug, Clone, Copy)]
pub struct RomancesConfig {
    pub mutual_romance_ttl_seconds: i64,
    pub non_mutual_romance_ttl_seconds: i64,
    pub dead_romance_ttl_seconds: i64,
}

impl Default for RomancesConfig {
    fn default() -> Self {
        Self {
            mutual_romance_ttl_seconds: 546 * DAY_SECONDS,
            non_mutual_romance_ttl_seconds: 180 * DAY_SECONDS,
            dead_romance_ttl_seconds: 90 * DAY_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CountersConfig {
    pub ttl_seconds: i64,
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: COUNTERS_TTL_HOURS * HOUR_SECONDS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub counters: CountersConfig,
    pub romances: RomancesConfig,
    pub version_conflict_retries: u32,
    pub group_delete_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/romance_ledger".to_string()),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            counters: CountersConfig::default(),
            romances: RomancesConfig::default(),
            version_conflict_retries: VERSION_CONFLICT_RETRIES,
            group_delete_limit: GROUP_DELETE_LIMIT,
        }
    }
}

impl Config {
    /// Loads `.env` (if present) then builds a `Config` from the
    /// environment, falling back to the original system's literal
    /// defaults for anything unset.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::default()
    }
}
