use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CollectError, Result};
use crate::schema::Query;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level structure loaded from `config.json`.
//
// It defines:
// - Where the app credentials live
// - API endpoints
// - Which task to run (search, lookup or stream)
// - Optional debug configuration
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// JSON file holding the app credentials
    #[serde(default = "default_apps_file")]
    pub apps_file: String,

    /// API endpoints shared by every app
    #[serde(default)]
    pub api: ApiEndpoints,

    /// Task to run
    pub task: TaskConfig,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

impl Config {
    /// Checks values serde cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        match &self.task {
            TaskConfig::Search(search) => search.validate(),
            TaskConfig::Lookup(lookup) => lookup.validate(),
            TaskConfig::Stream(stream) => stream.validate(),
        }
    }

    pub fn verbose(&self) -> bool {
        self.debug.as_ref().is_some_and(|d| d.log.unwrap_or(false))
    }
}

// ------------------------------------------------------------
// App credentials
// ------------------------------------------------------------
//
// One record per app, as stored in `config/my_apps.json`.
//
// Notes:
// - These are secrets and must never be committed.
// - Requests authenticate with the bearer token only; a record
//   without one is rejected when the pool is built. The OAuth1
//   secrets are kept for completeness.
//
#[derive(Debug, Deserialize, Clone)]
pub struct AppKeys {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,

    /// Display name of the app
    pub username: String,

    /// Pre-issued bearer token
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl AppKeys {
    /// Token sent as `Authorization: Bearer ...`
    pub fn token(&self) -> Result<&str> {
        match self.bearer_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(CollectError::config(format!(
                "app {} has no bearer_token",
                self.username
            ))),
        }
    }
}

// ------------------------------------------------------------
// API endpoints
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct ApiEndpoints {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    /// Per-request timeout for REST calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            stream_url: default_stream_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ------------------------------------------------------------
// Tasks
// ------------------------------------------------------------
//
// Exactly one task runs per process:
// - search: rotate apps over the search endpoint
// - lookup: fetch a list of ids in parallel
// - stream: listen to the filtered stream with a worker pool
//
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskConfig {
    Search(SearchConfig),
    Lookup(LookupConfig),
    Stream(StreamConfig),
}

/// Polling mode of the search task.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Poll for tweets newer than the cursor
    #[default]
    New,

    /// Paginate backwards until history runs out
    Past,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default)]
    pub mode: Mode,

    /// Minutes to sleep when exhausted or rate limited
    #[serde(default = "default_minutes")]
    pub minutes: f64,

    /// Initial cursor for `new` mode
    #[serde(default)]
    pub since_id: Option<u64>,

    /// Initial cursor for `past` mode
    #[serde(default)]
    pub max_id: Option<u64>,

    /// Extra search parameters (`q`, `lang`, ...) forwarded verbatim
    #[serde(default)]
    pub params: Query,
}

impl SearchConfig {
    pub fn new(mode: Mode, minutes: f64, params: Query) -> Self {
        Self {
            mode,
            minutes,
            since_id: None,
            max_id: None,
            params,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.minutes * 60.0)
    }

    fn validate(&self) -> Result<()> {
        if !(self.minutes.is_finite() && self.minutes > 0.0) {
            return Err(CollectError::config(format!(
                "minutes must be a positive number, got {}",
                self.minutes
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LookupConfig {
    /// Text file with one id per line
    pub ids_file: String,

    /// First rate-limit backoff delay
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    /// Backoff cap, `null` for uncapped doubling
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: Option<u64>,
}

impl LookupConfig {
    fn validate(&self) -> Result<()> {
        if self.base_delay_secs == 0 {
            return Err(CollectError::config("base_delay_secs must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Terms to track
    pub query: String,

    /// Number of worker tasks draining the queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Log transport errors
    #[serde(default)]
    pub verbose: bool,

    /// First delay before reopening a dropped stream; doubles while
    /// reconnects keep failing
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,

    /// Upper bound for the reconnect delay
    #[serde(default = "default_max_reconnect_secs")]
    pub max_reconnect_secs: u64,

    /// Extra filter parameters forwarded verbatim
    #[serde(default)]
    pub params: Query,
}

impl StreamConfig {
    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(CollectError::config("workers must be at least 1"));
        }
        if self.query.trim().is_empty() {
            return Err(CollectError::config("stream query is empty"));
        }
        Ok(())
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Enables debug-level logging for this crate
    pub log: Option<bool>,

    /// Seconds between metric lines, 0 disables them
    pub metrics_secs: Option<u64>,
}

fn default_apps_file() -> String {
    "config/my_apps.json".to_string()
}

fn default_rest_url() -> String {
    "https://api.twitter.com/1.1".to_string()
}

fn default_stream_url() -> String {
    "https://stream.twitter.com/1.1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_minutes() -> f64 {
    15.0
}

fn default_base_delay_secs() -> u64 {
    60
}

fn default_max_delay_secs() -> Option<u64> {
    Some(15 * 60)
}

fn default_workers() -> usize {
    4
}

fn default_reconnect_secs() -> u64 {
    5
}

fn default_max_reconnect_secs() -> u64 {
    320
}

// ------------------------------------------------------------
// Loaders
// ------------------------------------------------------------

/// Reads and validates `config.json`.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let data = fs::read_to_string(path)?;
    let cfg: Config = serde_json::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Reads the credential records.
pub fn load_apps(path: impl AsRef<Path>) -> Result<Vec<AppKeys>> {
    let data = fs::read_to_string(path)?;
    let keys: Vec<AppKeys> = serde_json::from_str(&data)?;
    Ok(keys)
}

/// Reads ids, one per line. Blank lines and `#` comments are skipped.
pub fn load_ids(path: impl AsRef<Path>) -> Result<Vec<u64>> {
    parse_ids(&fs::read_to_string(path)?)
}

pub fn parse_ids(data: &str) -> Result<Vec<u64>> {
    data.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            l.parse::<u64>()
                .map_err(|e| CollectError::config(format!("invalid id '{l}': {e}")))
        })
        .collect()
}
