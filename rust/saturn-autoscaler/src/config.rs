use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Static per-deployment scaling config (§4.6, §3). One entry per
/// Kubernetes deployment the autoscaler drives.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub deployment: String,
    pub namespace: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub scale_up_threshold: u64,
    pub scale_down_threshold: u64,
    pub queues: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    pub poll_interval: Duration,
    pub cooldown: Duration,
    pub deployments: HashMap<String, DeploymentConfig>,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            cooldown: Duration::from_secs(120),
            deployments: HashMap::new(),
        }
    }
}

impl AutoscalerConfig {
    pub fn with_deployment(mut self, config: DeploymentConfig) -> Self {
        self.deployments.insert(config.deployment.clone(), config);
        self
    }
}

/// On-disk shape (§6.6): seconds rather than `Duration` for plain TOML
/// round-tripping, a `Vec` rather than a map since TOML has no natural
/// keyed-by-name table-array syntax here.
#[derive(Debug, Deserialize)]
struct RawDeploymentConfig {
    deployment: String,
    namespace: String,
    min_replicas: u32,
    max_replicas: u32,
    scale_up_threshold: u64,
    scale_down_threshold: u64,
    queues: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawAutoscalerConfig {
    #[serde(default = "default_poll_interval_secs")]
    poll_interval_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    cooldown_secs: u64,
    #[serde(default)]
    deployments: Vec<RawDeploymentConfig>,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_cooldown_secs() -> u64 {
    120
}

impl From<RawAutoscalerConfig> for AutoscalerConfig {
    fn from(raw: RawAutoscalerConfig) -> Self {
        let mut config = AutoscalerConfig {
            poll_interval: Duration::from_secs(raw.poll_interval_secs),
            cooldown: Duration::from_secs(raw.cooldown_secs),
            deployments: HashMap::new(),
        };
        for d in raw.deployments {
            config = config.with_deployment(DeploymentConfig {
                deployment: d.deployment,
                namespace: d.namespace,
                min_replicas: d.min_replicas,
                max_replicas: d.max_replicas,
                scale_up_threshold: d.scale_up_threshold,
                scale_down_threshold: d.scale_down_threshold,
                queues: d.queues,
            });
        }
        config
    }
}
