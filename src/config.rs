use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::replay_stats::ReplayShape;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// How a cold ladder search walks the ranking pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    Sequential,
    Parallel,
}

impl FromStr for SearchStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sequential" | "seq" => Ok(Self::Sequential),
            "parallel" | "par" => Ok(Self::Parallel),
            other => Err(anyhow::anyhow!("unknown search strategy: {other}")),
        }
    }
}

/// Runtime settings. Every field can be overridden through the environment
/// (or a `.env` / `.env.local` file) using the upper-case key named on it.
#[derive(Debug, Clone)]
pub struct Settings {
    /// BASE_URL
    pub base_url: String,
    /// HOME_URL, fetched to bootstrap a session
    pub home_url: String,
    /// GAME_ID
    pub game_id: String,
    /// USER_AGENT
    pub user_agent: String,
    /// CACHE_DURATION (secs)
    pub cache_duration: Duration,
    /// BATCH_SIZE, also the hard cap on a ranking page `limit`
    pub batch_size: usize,
    /// MAX_SEARCH_OFFSET
    pub max_search_offset: usize,
    /// RATE_LIMIT_DELAY (secs)
    pub rate_limit_delay: Duration,
    /// MAX_RATE_LIMIT_WAITS
    pub max_rate_limit_waits: u32,
    /// ERROR_DELAY (secs), scaled by attempt number between retries
    pub error_delay: Duration,
    /// REQUEST_DELAY (secs)
    pub request_delay: Duration,
    /// MAX_RETRIES
    pub max_retries: u32,
    /// SESSION_WARMUP (secs)
    pub session_warmup: Duration,
    /// REQUEST_TIMEOUT_SECS
    pub request_timeout: Duration,
    /// MAX_CACHED_PLAYERS
    pub max_cached_players: usize,
    /// REPLAY_BATCH_SIZE
    pub replay_batch_size: usize,
    /// MAX_REPLAY_OFFSET
    pub max_replay_offset: usize,
    /// REPLAY_CACHE_DURATION (secs)
    pub replay_cache_duration: Duration,
    /// SEARCH_WORKERS
    pub search_workers: usize,
    /// SEARCH_STRATEGY
    pub search_strategy: SearchStrategy,
    /// REPLAY_SHAPE
    pub replay_shape: ReplayShape,
    /// CACHE_DIR
    pub cache_dir: PathBuf,
    /// LOG_DIR
    pub log_dir: PathBuf,
    /// LOG_LEVEL, used when RUST_LOG is unset
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://www.fightcade.com/api/".to_string(),
            home_url: "https://www.fightcade.com/".to_string(),
            game_id: "kof2002".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cache_duration: Duration::from_secs(600),
            batch_size: 100,
            max_search_offset: 5000,
            rate_limit_delay: Duration::from_secs(30),
            max_rate_limit_waits: 10,
            error_delay: Duration::from_secs(10),
            request_delay: Duration::from_secs(3),
            max_retries: 3,
            session_warmup: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            max_cached_players: 100,
            replay_batch_size: 50,
            max_replay_offset: 200,
            replay_cache_duration: Duration::from_secs(3600),
            search_workers: 5,
            search_strategy: SearchStrategy::Sequential,
            replay_shape: ReplayShape::ScoreSum,
            cache_dir: PathBuf::from("cache"),
            log_dir: PathBuf::from("logs"),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Loads `.env.local` and `.env` (when present) and then reads every key
    /// from the process environment, keeping the default for anything missing
    /// or unparsable.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");

        let d = Self::default();
        Self {
            base_url: env_string("BASE_URL", &d.base_url),
            home_url: env_string("HOME_URL", &d.home_url),
            game_id: env_string("GAME_ID", &d.game_id),
            user_agent: env_string("USER_AGENT", &d.user_agent),
            cache_duration: env_secs("CACHE_DURATION", d.cache_duration),
            batch_size: env_or_default("BATCH_SIZE", d.batch_size).clamp(1, 500),
            max_search_offset: env_or_default("MAX_SEARCH_OFFSET", d.max_search_offset)
                .clamp(1, 50_000),
            rate_limit_delay: env_secs("RATE_LIMIT_DELAY", d.rate_limit_delay),
            max_rate_limit_waits: env_or_default("MAX_RATE_LIMIT_WAITS", d.max_rate_limit_waits)
                .max(1),
            error_delay: env_secs("ERROR_DELAY", d.error_delay),
            request_delay: env_secs("REQUEST_DELAY", d.request_delay),
            max_retries: env_or_default("MAX_RETRIES", d.max_retries).clamp(1, 10),
            session_warmup: env_secs("SESSION_WARMUP", d.session_warmup),
            request_timeout: env_secs("REQUEST_TIMEOUT_SECS", d.request_timeout)
                .max(Duration::from_secs(1)),
            max_cached_players: env_or_default("MAX_CACHED_PLAYERS", d.max_cached_players)
                .max(1),
            replay_batch_size: env_or_default("REPLAY_BATCH_SIZE", d.replay_batch_size)
                .clamp(1, 500),
            max_replay_offset: env_or_default("MAX_REPLAY_OFFSET", d.max_replay_offset).max(1),
            replay_cache_duration: env_secs("REPLAY_CACHE_DURATION", d.replay_cache_duration),
            search_workers: env_or_default("SEARCH_WORKERS", d.search_workers).clamp(1, 16),
            search_strategy: env_or_default("SEARCH_STRATEGY", d.search_strategy),
            replay_shape: env_or_default("REPLAY_SHAPE", d.replay_shape),
            cache_dir: env::var("CACHE_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(d.cache_dir),
            log_dir: env::var("LOG_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(d.log_dir),
            log_level: env_string("LOG_LEVEL", &d.log_level),
        }
    }

    pub fn ranking_cache_path(&self) -> PathBuf {
        self.cache_dir.join("player_cache.json")
    }

    pub fn replay_cache_path(&self) -> PathBuf {
        self.cache_dir.join("replay_cache.json")
    }
}

fn env_or_default<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
        .unwrap_or_else(|| default.to_string())
}
