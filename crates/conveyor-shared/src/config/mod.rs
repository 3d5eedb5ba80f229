//! # Configuration
//!
//! Env-driven configuration with defaults for everything except the
//! database URL. The binary loads `.env` via `dotenvy` before calling
//! [`ConveyorConfig::from_env`]; the library never touches the process
//! environment outside that constructor.
//!
//! | Variable | Default |
//! |---|---|
//! | `CONVEYOR_DATABASE_URL` (or `DATABASE_URL`) | — (required) |
//! | `CONVEYOR_JOB_QUEUE` | `conveyor_jobs_queue` |
//! | `CONVEYOR_TASK_QUEUE` | `conveyor_tasks_queue` |
//! | `CONVEYOR_VISIBILITY_TIMEOUT_SECS` | `300` |
//! | `CONVEYOR_POLL_INTERVAL_MS` | `1000` |
//! | `CONVEYOR_BATCH_SIZE` | `10` |
//! | `CONVEYOR_TASK_CONCURRENCY` | `4` |
//! | `CONVEYOR_HANDLER_TIMEOUT_SECS` | `600` |
//! | `CONVEYOR_HANDLER_TIMEOUT_OVERRIDES` | (empty; `type=secs,...`) |
//! | `CONVEYOR_RENEWAL_CEILING_SECS` | `1800` |
//! | `CONVEYOR_MAX_RETRIES` | `3` |
//! | `CONVEYOR_RETRY_BACKOFF_BASE_MS` | `200` |
//! | `CONVEYOR_RETRY_BACKOFF_CAP_MS` | `5000` |
//! | `CONVEYOR_JANITOR_THRESHOLD_SECS` | `900` |
//! | `CONVEYOR_JANITOR_INTERVAL_SECS` | `60` |
//! | `CONVEYOR_BIND_ADDR` | `0.0.0.0:8080` |
//! | `CONVEYOR_DB_MAX_CONNECTIONS` | `10` |

use std::collections::HashMap;
use std::time::Duration;

use crate::errors::{ConveyorError, ConveyorResult};
use crate::messaging::QueueRouter;

/// Queue transport settings
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub job_queue: String,
    pub task_queue: String,
    /// Per-message lock duration taken at receive time
    pub visibility_timeout: Duration,
    /// Consumer sleep when a poll returns nothing
    pub poll_interval: Duration,
    /// Messages fetched per poll
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            job_queue: "conveyor_jobs_queue".into(),
            task_queue: "conveyor_tasks_queue".into(),
            visibility_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(1000),
            batch_size: 10,
        }
    }
}

impl QueueConfig {
    pub fn router(&self) -> QueueRouter {
        QueueRouter::new(self.job_queue.clone(), self.task_queue.clone())
    }
}

/// Handler execution settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Concurrent task messages per worker process
    pub task_concurrency: usize,
    pub default_handler_timeout: Duration,
    /// Per-task-type overrides of the handler timeout
    pub handler_timeout_overrides: HashMap<String, Duration>,
    /// Hard ceiling on lock auto-renewal; a handler still running past
    /// this is a design error and its message is abandoned
    pub renewal_ceiling: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            task_concurrency: 4,
            default_handler_timeout: Duration::from_secs(600),
            handler_timeout_overrides: HashMap::new(),
            renewal_ceiling: Duration::from_secs(1800),
        }
    }
}

impl ExecutionConfig {
    pub fn handler_timeout(&self, task_type: &str) -> Duration {
        self.handler_timeout_overrides
            .get(task_type)
            .copied()
            .unwrap_or(self.default_handler_timeout)
    }
}

/// Bounded retry settings for failed handlers and transient errors
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_millis(5000),
        }
    }
}

/// Janitor settings
#[derive(Debug, Clone, PartialEq)]
pub struct JanitorConfig {
    /// A `processing` task whose liveness timestamp is older than this is
    /// declared dead
    pub stale_threshold: Duration,
    pub sweep_interval: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Full system configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConveyorConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub queues: QueueConfig,
    pub execution: ExecutionConfig,
    pub retry: RetryConfig,
    pub janitor: JanitorConfig,
    pub bind_addr: String,
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            db_max_connections: 10,
            queues: QueueConfig::default(),
            execution: ExecutionConfig::default(),
            retry: RetryConfig::default(),
            janitor: JanitorConfig::default(),
            bind_addr: "0.0.0.0:8080".into(),
        }
    }
}

impl ConveyorConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> ConveyorResult<Self> {
        let database_url = std::env::var("CONVEYOR_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| {
                ConveyorError::Configuration(
                    "CONVEYOR_DATABASE_URL (or DATABASE_URL) is required".into(),
                )
            })?;

        let mut config = Self {
            database_url,
            ..Self::default()
        };

        if let Some(v) = env_opt("CONVEYOR_DB_MAX_CONNECTIONS") {
            config.db_max_connections = parse(&v, "CONVEYOR_DB_MAX_CONNECTIONS")?;
        }
        if let Some(v) = env_opt("CONVEYOR_JOB_QUEUE") {
            config.queues.job_queue = v;
        }
        if let Some(v) = env_opt("CONVEYOR_TASK_QUEUE") {
            config.queues.task_queue = v;
        }
        if let Some(v) = env_opt("CONVEYOR_VISIBILITY_TIMEOUT_SECS") {
            config.queues.visibility_timeout =
                Duration::from_secs(parse(&v, "CONVEYOR_VISIBILITY_TIMEOUT_SECS")?);
        }
        if let Some(v) = env_opt("CONVEYOR_POLL_INTERVAL_MS") {
            config.queues.poll_interval =
                Duration::from_millis(parse(&v, "CONVEYOR_POLL_INTERVAL_MS")?);
        }
        if let Some(v) = env_opt("CONVEYOR_BATCH_SIZE") {
            config.queues.batch_size = parse(&v, "CONVEYOR_BATCH_SIZE")?;
        }
        if let Some(v) = env_opt("CONVEYOR_TASK_CONCURRENCY") {
            config.execution.task_concurrency = parse(&v, "CONVEYOR_TASK_CONCURRENCY")?;
        }
        if let Some(v) = env_opt("CONVEYOR_HANDLER_TIMEOUT_SECS") {
            config.execution.default_handler_timeout =
                Duration::from_secs(parse(&v, "CONVEYOR_HANDLER_TIMEOUT_SECS")?);
        }
        if let Some(v) = env_opt("CONVEYOR_HANDLER_TIMEOUT_OVERRIDES") {
            config.execution.handler_timeout_overrides = parse_timeout_overrides(&v)?;
        }
        if let Some(v) = env_opt("CONVEYOR_RENEWAL_CEILING_SECS") {
            config.execution.renewal_ceiling =
                Duration::from_secs(parse(&v, "CONVEYOR_RENEWAL_CEILING_SECS")?);
        }
        if let Some(v) = env_opt("CONVEYOR_MAX_RETRIES") {
            config.retry.max_retries = parse(&v, "CONVEYOR_MAX_RETRIES")?;
        }
        if let Some(v) = env_opt("CONVEYOR_RETRY_BACKOFF_BASE_MS") {
            config.retry.backoff_base =
                Duration::from_millis(parse(&v, "CONVEYOR_RETRY_BACKOFF_BASE_MS")?);
        }
        if let Some(v) = env_opt("CONVEYOR_RETRY_BACKOFF_CAP_MS") {
            config.retry.backoff_cap =
                Duration::from_millis(parse(&v, "CONVEYOR_RETRY_BACKOFF_CAP_MS")?);
        }
        if let Some(v) = env_opt("CONVEYOR_JANITOR_THRESHOLD_SECS") {
            config.janitor.stale_threshold =
                Duration::from_secs(parse(&v, "CONVEYOR_JANITOR_THRESHOLD_SECS")?);
        }
        if let Some(v) = env_opt("CONVEYOR_JANITOR_INTERVAL_SECS") {
            config.janitor.sweep_interval =
                Duration::from_secs(parse(&v, "CONVEYOR_JANITOR_INTERVAL_SECS")?);
        }
        if let Some(v) = env_opt("CONVEYOR_BIND_ADDR") {
            config.bind_addr = v;
        }

        Ok(config)
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> ConveyorResult<T> {
    value
        .parse()
        .map_err(|_| ConveyorError::Configuration(format!("{key}: cannot parse '{value}'")))
}

/// Parse `task_type=secs,task_type=secs` into per-type timeouts
fn parse_timeout_overrides(raw: &str) -> ConveyorResult<HashMap<String, Duration>> {
    let mut overrides = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (task_type, secs) = entry.split_once('=').ok_or_else(|| {
            ConveyorError::Configuration(format!(
                "CONVEYOR_HANDLER_TIMEOUT_OVERRIDES: '{entry}' is not 'task_type=secs'"
            ))
        })?;
        let secs: u64 = parse(secs.trim(), "CONVEYOR_HANDLER_TIMEOUT_OVERRIDES")?;
        overrides.insert(task_type.trim().to_string(), Duration::from_secs(secs));
    }
    Ok(overrides)
}
