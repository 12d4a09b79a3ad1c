// Layered worker settings (§6.6), mirroring the original source's
// `CrawlerSettings` (`infrastructure/settings/config.py`): a TOML file at
// `SATURN_CONFIG_PATH` (default `worker.toml`) plus a `SATURN_`-prefixed
// environment override for every scalar worker/resource field, so a
// deployment can tune any one of them without editing the file.

use saturn_consumer::{RawWorkerConfig, WorkerConfig};
use saturn_injector::InjectorConfig;
use saturn_support::config::env_or;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
pub struct RawCrawlerSettings {
    #[serde(default)]
    pub worker: RawWorkerSection,
    #[serde(default)]
    pub resources: RawResourceSection,
}

#[derive(Debug, Deserialize)]
pub struct RawWorkerSection {
    #[serde(flatten)]
    pub worker: RawWorkerConfig,
}

impl Default for RawWorkerSection {
    fn default() -> Self {
        // Serde's `flatten` + `default` combination needs an explicit
        // default path since `RawWorkerConfig` has no blanket `Default`.
        let empty = toml::from_str::<RawWorkerConfig>("").expect("all RawWorkerConfig fields carry defaults");
        Self { worker: empty }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawResourceSection {
    #[serde(default = "default_resource_cache_ttl_minutes")]
    pub resource_cache_ttl_minutes: i64,
    #[serde(default = "default_credential_freshness_minutes")]
    pub credential_freshness_minutes: i64,
    #[serde(default)]
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub market_referers: HashMap<String, String>,
}

impl Default for RawResourceSection {
    fn default() -> Self {
        Self {
            resource_cache_ttl_minutes: default_resource_cache_ttl_minutes(),
            credential_freshness_minutes: default_credential_freshness_minutes(),
            user_agents: Vec::new(),
            market_referers: HashMap::new(),
        }
    }
}

fn default_resource_cache_ttl_minutes() -> i64 {
    60
}
fn default_credential_freshness_minutes() -> i64 {
    30
}

pub struct CrawlerSettings {
    pub worker: WorkerConfig,
    pub injector: InjectorConfig,
}

impl CrawlerSettings {
    /// Loads `path` if present, falling back to all-default settings when
    /// the file is missing or unparsable (a fresh checkout with no
    /// `worker.toml` yet should still start, per the original source's
    /// `CrawlerSettings` behavior of always resolving to *some* config).
    pub fn load(path: &str) -> Self {
        let raw: RawCrawlerSettings = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| toml::from_str(&content).ok())
            .unwrap_or_default();
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawCrawlerSettings) -> Self {
        let mut worker: WorkerConfig = raw.worker.worker.into();
        worker.worker_id = env_or("SATURN_WORKER_ID", worker.worker_id);
        worker.max_concurrent_tasks = env_or("SATURN_MAX_CONCURRENT_TASKS", worker.max_concurrent_tasks);
        worker.task_timeout = Duration::from_secs(env_or("SATURN_TASK_TIMEOUT_SECS", worker.task_timeout.as_secs()));
        worker.dequeue_block_timeout = Duration::from_secs(env_or(
            "SATURN_DEQUEUE_BLOCK_TIMEOUT_SECS",
            worker.dequeue_block_timeout.as_secs(),
        ));
        worker.heartbeat_interval = Duration::from_secs(env_or(
            "SATURN_HEARTBEAT_INTERVAL_SECS",
            worker.heartbeat_interval.as_secs(),
        ));
        worker.deadline_scan_interval = Duration::from_secs(env_or(
            "SATURN_DEADLINE_SCAN_INTERVAL_SECS",
            worker.deadline_scan_interval.as_secs(),
        ));
        worker.worker_registration_ttl = Duration::from_secs(env_or(
            "SATURN_WORKER_REGISTRATION_TTL_SECS",
            worker.worker_registration_ttl.as_secs(),
        ));
        worker.worker_status_ttl = Duration::from_secs(env_or(
            "SATURN_WORKER_STATUS_TTL_SECS",
            worker.worker_status_ttl.as_secs(),
        ));

        let credential_freshness_minutes = env_or(
            "SATURN_CREDENTIAL_FRESHNESS_MINUTES",
            raw.resources.credential_freshness_minutes,
        );
        let resource_cache_ttl_minutes = env_or(
            "SATURN_RESOURCE_CACHE_TTL_MINUTES",
            raw.resources.resource_cache_ttl_minutes,
        );
        let mut injector = InjectorConfig {
            credential_freshness: chrono::Duration::minutes(credential_freshness_minutes),
            proxy_idle_window: chrono::Duration::minutes(resource_cache_ttl_minutes),
            ..InjectorConfig::default()
        };
        if !raw.resources.user_agents.is_empty() {
            injector.user_agents = raw.resources.user_agents;
        }
        injector.market_referers = raw.resources.market_referers;

        Self { worker, injector }
    }
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self::from_raw(RawCrawlerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let settings = CrawlerSettings::load("/nonexistent/worker.toml");
        assert_eq!(settings.worker.max_concurrent_tasks, 5);
        assert_eq!(settings.injector.credential_freshness, chrono::Duration::minutes(30));
    }

    #[test]
    fn env_override_wins_over_file_default() {
        std::env::set_var("SATURN_MAX_CONCURRENT_TASKS", "12");
        let settings = CrawlerSettings::load("/nonexistent/worker.toml");
        assert_eq!(settings.worker.max_concurrent_tasks, 12);
        std::env::remove_var("SATURN_MAX_CONCURRENT_TASKS");
    }

    #[test]
    fn every_scalar_worker_and_resource_field_honors_its_env_override() {
        std::env::set_var("SATURN_TASK_TIMEOUT_SECS", "45");
        std::env::set_var("SATURN_DEQUEUE_BLOCK_TIMEOUT_SECS", "7");
        std::env::set_var("SATURN_HEARTBEAT_INTERVAL_SECS", "10");
        std::env::set_var("SATURN_DEADLINE_SCAN_INTERVAL_SECS", "3");
        std::env::set_var("SATURN_WORKER_REGISTRATION_TTL_SECS", "90");
        std::env::set_var("SATURN_WORKER_STATUS_TTL_SECS", "91");
        std::env::set_var("SATURN_CREDENTIAL_FRESHNESS_MINUTES", "15");
        std::env::set_var("SATURN_RESOURCE_CACHE_TTL_MINUTES", "20");

        let settings = CrawlerSettings::load("/nonexistent/worker.toml");

        assert_eq!(settings.worker.task_timeout, Duration::from_secs(45));
        assert_eq!(settings.worker.dequeue_block_timeout, Duration::from_secs(7));
        assert_eq!(settings.worker.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(settings.worker.deadline_scan_interval, Duration::from_secs(3));
        assert_eq!(settings.worker.worker_registration_ttl, Duration::from_secs(90));
        assert_eq!(settings.worker.worker_status_ttl, Duration::from_secs(91));
        assert_eq!(settings.injector.credential_freshness, chrono::Duration::minutes(15));
        assert_eq!(settings.injector.proxy_idle_window, chrono::Duration::minutes(20));

        for key in [
            "SATURN_TASK_TIMEOUT_SECS",
            "SATURN_DEQUEUE_BLOCK_TIMEOUT_SECS",
            "SATURN_HEARTBEAT_INTERVAL_SECS",
            "SATURN_DEADLINE_SCAN_INTERVAL_SECS",
            "SATURN_WORKER_REGISTRATION_TTL_SECS",
            "SATURN_WORKER_STATUS_TTL_SECS",
            "SATURN_CREDENTIAL_FRESHNESS_MINUTES",
            "SATURN_RESOURCE_CACHE_TTL_MINUTES",
        ] {
            std::env::remove_var(key);
        }
    }
}
