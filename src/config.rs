use std::path::PathBuf;

use crate::error::{AppError, Result};

pub const API_REGION: &str = "eu";
pub const API_LOCALE: &str = "en_GB";

/// Copper per gold: the source reports prices in the minor unit.
pub const COPPER_PER_GOLD: u64 = 10_000;

/// Timeout applied to every outbound HTTP request (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Refresh the OAuth token this many seconds before the source says it expires.
pub const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One batch round over the realms that are due.
    Once,
    /// One batch round over every realm, ignoring the schedule.
    Force,
    /// Continuous single-threaded scheduler, forever.
    Loop,
}

impl std::str::FromStr for RunMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "once" => Ok(RunMode::Once),
            "force" => Ok(RunMode::Force),
            "loop" => Ok(RunMode::Loop),
            other => Err(AppError::Config(format!(
                "RUN_MODE must be one of once|force|loop, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub client_id: String,
    pub client_secret: String,
    pub locale: String,
    /// Base URL of the game data API (API_BASE_URL), derived from API_REGION by default.
    pub api_base_url: String,
    /// OAuth client-credentials endpoint (OAUTH_URL).
    pub oauth_url: String,
    pub catalog_db_path: String,
    pub current_db_path: String,
    pub history_db_path: String,
    pub checkpoint_path: PathBuf,
    /// Where raw dumps are spooled when KEEP_RAW_DUMPS is set.
    pub temp_dir: PathBuf,
    pub keep_raw_dumps: bool,
    /// Tolerance subtracted from a realm's expected update time (SCHEDULE_GRACE_SECS).
    pub grace_secs: u64,
    /// Added to the computed sleep before the next due realm (SCHEDULE_SLEEP_BUFFER_SECS).
    pub sleep_buffer_secs: u64,
    /// Minimum gap between two probes of the same realm in loop mode (PROBE_COOLDOWN_SECS).
    pub probe_cooldown_secs: u64,
    /// Upper bound on one realm's probe+fetch+cluster (WORKER_TIMEOUT_SECS).
    pub worker_timeout_secs: u64,
    /// Listings unseen for this long leave the history identity index
    /// (HISTORY_RETENTION_SECS). 0 keeps them all.
    pub history_retention_secs: u64,
    /// When set, any stack at or above this size is eligible instead of the
    /// item's explicit stack list (MIN_STACK_SIZE).
    pub min_stack_size: Option<u32>,
    /// Sellers tracked on every realm, on top of the catalog's per-realm list.
    pub tracked_sellers: Vec<String>,
    pub run_mode: RunMode,
    /// Status server port; 0 disables it.
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let region = std::env::var("API_REGION").unwrap_or_else(|_| API_REGION.to_string());

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_id: std::env::var("CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("CLIENT_SECRET").unwrap_or_default(),
            locale: std::env::var("API_LOCALE").unwrap_or_else(|_| API_LOCALE.to_string()),
            api_base_url: std::env::var("API_BASE_URL")
                .unwrap_or_else(|_| format!("https://{region}.api.blizzard.com")),
            oauth_url: std::env::var("OAUTH_URL")
                .unwrap_or_else(|_| format!("https://{region}.battle.net/oauth/token")),
            catalog_db_path: std::env::var("CATALOG_DB").unwrap_or_else(|_| "catalog.db".to_string()),
            current_db_path: std::env::var("CURRENT_DB").unwrap_or_else(|_| "current.db".to_string()),
            history_db_path: std::env::var("HISTORY_DB").unwrap_or_else(|_| "history.db".to_string()),
            checkpoint_path: std::env::var("CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("checkpoint.json")),
            temp_dir: std::env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            keep_raw_dumps: std::env::var("KEEP_RAW_DUMPS")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
            grace_secs: parse_required("SCHEDULE_GRACE_SECS", 3)?,
            sleep_buffer_secs: parse_required("SCHEDULE_SLEEP_BUFFER_SECS", 5)?,
            probe_cooldown_secs: parse_required("PROBE_COOLDOWN_SECS", 60)?,
            worker_timeout_secs: parse_required("WORKER_TIMEOUT_SECS", 120)?,
            history_retention_secs: parse_required("HISTORY_RETENTION_SECS", 7 * 24 * 3600)?,
            min_stack_size: std::env::var("MIN_STACK_SIZE")
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok()),
            tracked_sellers: std::env::var("TRACKED_SELLERS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            run_mode: std::env::var("RUN_MODE")
                .unwrap_or_else(|_| "loop".to_string())
                .parse()?,
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
        })
    }
}

/// Reads a numeric setting the scheduler depends on. Unset means default;
/// set-but-garbage is a configuration error rather than a silent fallback.
fn parse_required(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|_| AppError::Config(format!("{key} must be a non-negative integer"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    /// Configuration used by unit tests: no network, no files touched.
    pub fn for_tests() -> Self {
        Self {
            log_level: "debug".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            locale: API_LOCALE.to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            oauth_url: "http://127.0.0.1:9/oauth/token".to_string(),
            catalog_db_path: ":memory:".to_string(),
            current_db_path: ":memory:".to_string(),
            history_db_path: ":memory:".to_string(),
            checkpoint_path: std::env::temp_dir().join("harvester-test-checkpoint.json"),
            temp_dir: std::env::temp_dir(),
            keep_raw_dumps: false,
            grace_secs: 3,
            sleep_buffer_secs: 5,
            probe_cooldown_secs: 60,
            worker_timeout_secs: 5,
            history_retention_secs: 0,
            min_stack_size: None,
            tracked_sellers: Vec::new(),
            run_mode: RunMode::Once,
            api_port: 0,
        }
    }
}
