use serde::Deserialize;
use saturn_broker::Priority;
use std::time::Duration;

/// Static configuration for one worker process (§4.4). Loaded once at
/// `initialize` and never mutated afterward -- there is no module-level
/// global holding this; it is owned by the `TaskConsumer` and passed down
/// to everything that needs it.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub max_concurrent_tasks: usize,
    pub task_timeout: Duration,
    pub allowed_task_types: Vec<String>,
    pub allowed_markets: Vec<String>,
    pub listened_priorities: Vec<Priority>,
    pub dequeue_block_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub deadline_scan_interval: Duration,
    pub worker_registration_ttl: Duration,
    pub worker_status_ttl: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "crawler-worker-01".to_string(),
            max_concurrent_tasks: 5,
            task_timeout: Duration::from_secs(300),
            allowed_task_types: vec![
                "1m_realtime".to_string(),
                "5m_realtime".to_string(),
                "15m_realtime".to_string(),
                "15m_backfill".to_string(),
                "1d_backfill".to_string(),
            ],
            allowed_markets: vec!["CN".to_string(), "US".to_string(), "HK".to_string()],
            listened_priorities: vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low],
            dequeue_block_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            deadline_scan_interval: Duration::from_secs(10),
            worker_registration_ttl: Duration::from_secs(120),
            worker_status_ttl: Duration::from_secs(120),
        }
    }
}

impl WorkerConfig {
    pub fn allows(&self, task_type: &str, market: &str) -> bool {
        self.allowed_task_types.iter().any(|t| t == task_type)
            && self.allowed_markets.iter().any(|m| m == market)
    }
}

/// On-disk shape (§6.6): plain seconds and string priority names rather
/// than `Duration`/`Priority`, for straightforward TOML round-tripping.
#[derive(Debug, Deserialize)]
pub struct RawWorkerConfig {
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default)]
    pub allowed_task_types: Vec<String>,
    #[serde(default)]
    pub allowed_markets: Vec<String>,
    #[serde(default)]
    pub listened_priorities: Vec<String>,
    #[serde(default = "default_dequeue_block_timeout_secs")]
    pub dequeue_block_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_deadline_scan_interval_secs")]
    pub deadline_scan_interval_secs: u64,
    #[serde(default = "default_worker_registration_ttl_secs")]
    pub worker_registration_ttl_secs: u64,
    #[serde(default = "default_worker_status_ttl_secs")]
    pub worker_status_ttl_secs: u64,
}

fn default_worker_id() -> String {
    "crawler-worker-01".to_string()
}
fn default_max_concurrent_tasks() -> usize {
    5
}
fn default_task_timeout_secs() -> u64 {
    300
}
fn default_dequeue_block_timeout_secs() -> u64 {
    5
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_deadline_scan_interval_secs() -> u64 {
    10
}
fn default_worker_registration_ttl_secs() -> u64 {
    120
}
fn default_worker_status_ttl_secs() -> u64 {
    120
}

fn parse_priority(name: &str) -> Option<Priority> {
    match name.to_uppercase().as_str() {
        "CRITICAL" => Some(Priority::Critical),
        "HIGH" => Some(Priority::High),
        "NORMAL" => Some(Priority::Normal),
        "LOW" => Some(Priority::Low),
        _ => None,
    }
}

impl From<RawWorkerConfig> for WorkerConfig {
    fn from(raw: RawWorkerConfig) -> Self {
        let defaults = WorkerConfig::default();
        let allowed_task_types = if raw.allowed_task_types.is_empty() {
            defaults.allowed_task_types
        } else {
            raw.allowed_task_types
        };
        let allowed_markets = if raw.allowed_markets.is_empty() {
            defaults.allowed_markets
        } else {
            raw.allowed_markets
        };
        let listened_priorities: Vec<Priority> = raw
            .listened_priorities
            .iter()
            .filter_map(|name| parse_priority(name))
            .collect();
        let listened_priorities = if listened_priorities.is_empty() {
            defaults.listened_priorities
        } else {
            listened_priorities
        };

        Self {
            worker_id: raw.worker_id,
            max_concurrent_tasks: raw.max_concurrent_tasks,
            task_timeout: Duration::from_secs(raw.task_timeout_secs),
            allowed_task_types,
            allowed_markets,
            listened_priorities,
            dequeue_block_timeout: Duration::from_secs(raw.dequeue_block_timeout_secs),
            heartbeat_interval: Duration::from_secs(raw.heartbeat_interval_secs),
            deadline_scan_interval: Duration::from_secs(raw.deadline_scan_interval_secs),
            worker_registration_ttl: Duration::from_secs(raw.worker_registration_ttl_secs),
            worker_status_ttl: Duration::from_secs(raw.worker_status_ttl_secs),
        }
    }
}
