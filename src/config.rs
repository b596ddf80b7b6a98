use crate::error::{AppError, Result};

pub const INDEXER_URL: &str = "http://localhost:8080/v1/graphql";

/// Creation events are paged in chunks of this size until a short page.
pub const EVENT_PAGE_SIZE: i64 = 100;

/// How many resolution events to pull per sync pass. Resolution flags are
/// re-derived every pass, so a market missed once is picked up on the next.
pub const RESOLUTION_FETCH_LIMIT: i64 = 50;

/// Per-market trade event fetch cap. Volume is recomputed from the full
/// event set each pass, so this bounds one query, not correctness over time.
pub const TRADE_FETCH_LIMIT: i64 = 1000;

/// Detail fetches per concurrent window.
pub const FETCH_WINDOW_SIZE: usize = 5;

/// Pause between fetch windows (milliseconds).
pub const FETCH_WINDOW_DELAY_MS: u64 = 100;

/// Scheduled discovery interval (seconds).
pub const SYNC_INTERVAL_SECS: u64 = 300;

/// Evaluation cycle interval (seconds).
pub const EVAL_INTERVAL_SECS: u64 = 30;

/// Queue poll interval for job workers (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Retry budget per job instance. Attempts beyond this mark the job failed.
pub const JOB_MAX_ATTEMPTS: i64 = 3;

/// Retry backoff doubles from the base up to the cap (milliseconds).
pub const JOB_BACKOFF_BASE_MS: i64 = 1_000;
pub const JOB_BACKOFF_MAX_MS: i64 = 60_000;

/// Terminal jobs kept per queue for inspection; older ones are pruned.
pub const COMPLETED_JOB_RETENTION: i64 = 5;
pub const FAILED_JOB_RETENTION: i64 = 10;

/// HTTP timeouts (seconds).
pub const INDEXER_TIMEOUT_SECS: u64 = 30;
pub const METADATA_TIMEOUT_SECS: u64 = 10;
pub const PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Scoring provider endpoints.
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Queue wiring: one queue per recurring action, one job kind each.
pub const SYNC_QUEUE: &str = "market-sync";
pub const EVAL_QUEUE: &str = "market-eval";
pub const SYNC_JOB_KIND: &str = "sync-from-indexer";
pub const EVAL_JOB_KIND: &str = "evaluate-one";

#[derive(Debug, Clone)]
pub struct Config {
    pub indexer_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Scheduled discovery period in seconds (SYNC_INTERVAL_SECS).
    pub sync_interval_secs: u64,
    /// Evaluation cycle period in seconds (EVAL_INTERVAL_SECS).
    pub eval_interval_secs: u64,
    /// Concurrent detail fetches per window (FETCH_WINDOW_SIZE). Must be >= 1.
    pub fetch_window_size: usize,
    /// Pause between fetch windows in milliseconds (FETCH_WINDOW_DELAY_MS).
    pub fetch_window_delay_ms: u64,
    /// Set SYNC_SCHEDULE_ENABLED=false to leave discovery operator-triggered only.
    pub sync_schedule_enabled: bool,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            indexer_url: std::env::var("INDEXER_URL").unwrap_or_else(|_| INDEXER_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "market_sync.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            sync_interval_secs: std::env::var("SYNC_INTERVAL_SECS")
                .unwrap_or_default()
                .parse::<u64>()
                .unwrap_or(SYNC_INTERVAL_SECS),
            eval_interval_secs: std::env::var("EVAL_INTERVAL_SECS")
                .unwrap_or_default()
                .parse::<u64>()
                .unwrap_or(EVAL_INTERVAL_SECS),
            fetch_window_size: std::env::var("FETCH_WINDOW_SIZE")
                .unwrap_or_default()
                .parse::<usize>()
                .unwrap_or(FETCH_WINDOW_SIZE),
            fetch_window_delay_ms: std::env::var("FETCH_WINDOW_DELAY_MS")
                .unwrap_or_default()
                .parse::<u64>()
                .unwrap_or(FETCH_WINDOW_DELAY_MS),
            sync_schedule_enabled: !matches!(
                std::env::var("SYNC_SCHEDULE_ENABLED").as_deref(),
                Ok("false") | Ok("0")
            ),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
        };

        if cfg.fetch_window_size == 0 {
            return Err(AppError::Config(
                "FETCH_WINDOW_SIZE must be >= 1".to_string(),
            ));
        }

        Ok(cfg)
    }
}
