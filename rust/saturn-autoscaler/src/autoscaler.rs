// External Autoscaler (§4.6): polls per-queue depth, decides scale
// up/down per deployment under cooldown and min/max guards, and applies
// the new replica count through the orchestrator API. Runs as its own
// process/loop; shares no state with worker replicas beyond the broker.

#![allow(clippy::expect_used)]

use crate::config::{AutoscalerConfig, DeploymentConfig};
use crate::error::{AutoscalerError, AutoscalerResult};
use crate::orchestrator::OrchestratorClient;
use saturn_broker::BrokerGateway;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    ScaleUp(u32),
    ScaleDown(u32),
    NoAction,
}

pub struct Autoscaler {
    broker: Arc<dyn BrokerGateway>,
    orchestrator: Arc<dyn OrchestratorClient>,
    config: AutoscalerConfig,
    last_scale_time: Mutex<HashMap<String, Instant>>,
}

impl Autoscaler {
    pub fn new(broker: Arc<dyn BrokerGateway>, orchestrator: Arc<dyn OrchestratorClient>, config: AutoscalerConfig) -> Self {
        Self {
            broker,
            orchestrator,
            config,
            last_scale_time: Mutex::new(HashMap::new()),
        }
    }

    /// One polling cycle: aggregate depths, decide and apply an action
    /// per deployment, tolerating transient broker/orchestrator errors
    /// without corrupting the cooldown map (§6.4).
    pub async fn tick(&self) -> HashMap<String, ScaleAction> {
        let mut actions = HashMap::new();
        for deployment in self.config.deployments.values() {
            let action = self.tick_one(deployment).await.unwrap_or_else(|e| {
                warn!(deployment = %deployment.deployment, error = %e, "autoscaler tick failed, continuing to next deployment");
                ScaleAction::NoAction
            });
            actions.insert(deployment.deployment.clone(), action);
        }
        actions
    }

    async fn tick_one(&self, deployment: &DeploymentConfig) -> AutoscalerResult<ScaleAction> {
        let mut total_depth: u64 = 0;
        for queue in &deployment.queues {
            total_depth += self.broker.queue_depth(queue).await?;
        }

        let current = match self
            .orchestrator
            .read_deployment(&deployment.deployment, &deployment.namespace)
            .await?
        {
            Some(current) => current,
            None => return Ok(ScaleAction::NoAction),
        };

        let decided = decide(deployment, current, total_depth);

        if decided == ScaleAction::NoAction {
            return Ok(ScaleAction::NoAction);
        }

        if self.in_cooldown(&deployment.deployment) {
            return Ok(ScaleAction::NoAction);
        }

        let target = match decided {
            ScaleAction::ScaleUp(t) | ScaleAction::ScaleDown(t) => t,
            ScaleAction::NoAction => unreachable!("NoAction handled above"),
        };

        self.orchestrator
            .patch_deployment_replicas(&deployment.deployment, &deployment.namespace, target)
            .await?;
        self.record_scale(&deployment.deployment);
        info!(deployment = %deployment.deployment, current, target, depth = total_depth, "autoscaler applied scaling action");

        Ok(decided)
    }

    /// Bypasses threshold logic but still validates bounds and records
    /// the cooldown (§4.6).
    pub async fn manual_scale(&self, deployment_name: &str, replicas: u32, reason: &str) -> AutoscalerResult<()> {
        let deployment = self
            .config
            .deployments
            .get(deployment_name)
            .ok_or_else(|| AutoscalerError::UnknownDeployment(deployment_name.to_string()))?;

        if replicas < deployment.min_replicas || replicas > deployment.max_replicas {
            return Err(AutoscalerError::OutOfBounds(replicas, deployment.min_replicas, deployment.max_replicas));
        }

        self.orchestrator
            .patch_deployment_replicas(&deployment.deployment, &deployment.namespace, replicas)
            .await?;
        self.record_scale(deployment_name);
        info!(deployment = %deployment_name, replicas, reason, "manual scaling override applied");
        Ok(())
    }

    fn in_cooldown(&self, deployment: &str) -> bool {
        let last_scale_time = self.last_scale_time.lock().expect("cooldown map mutex poisoned");
        match last_scale_time.get(deployment) {
            Some(last) => last.elapsed() < self.config.cooldown,
            None => false,
        }
    }

    fn record_scale(&self, deployment: &str) {
        self.last_scale_time
            .lock()
            .expect("cooldown map mutex poisoned")
            .insert(deployment.to_string(), Instant::now());
    }
}

/// Pure decision function (§4.6 step 2), separated from I/O so the
/// asymmetric-rate rule is directly unit-testable.
fn decide(deployment: &DeploymentConfig, current: u32, total_depth: u64) -> ScaleAction {
    if total_depth >= deployment.scale_up_threshold {
        let step = ((total_depth as f64 / 50.0).ceil() as u32).min(3);
        let target = deployment.max_replicas.min(current + step);
        ScaleAction::ScaleUp(target)
    } else if total_depth <= deployment.scale_down_threshold && current > deployment.min_replicas {
        let target = deployment.min_replicas.max(current.saturating_sub(1));
        ScaleAction::ScaleDown(target)
    } else {
        ScaleAction::NoAction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::InMemoryOrchestrator;
    use saturn_broker::InMemoryBroker;

    fn deployment(name: &str) -> DeploymentConfig {
        DeploymentConfig {
            deployment: name.to_string(),
            namespace: "default".to_string(),
            min_replicas: 2,
            max_replicas: 10,
            scale_up_threshold: 80,
            scale_down_threshold: 10,
            queues: vec!["crawler_realtime_high".to_string()],
        }
    }

    #[test]
    fn scale_up_step_is_capped_at_three_and_bounded_by_max() {
        let d = deployment("saturn-crawler-high");
        let action = decide(&d, 3, 160);
        assert_eq!(action, ScaleAction::ScaleUp(6)); // min(10, 3 + min(ceil(160/50)=4, 3)) = 6
    }

    #[test]
    fn scale_down_moves_by_exactly_one_and_respects_min() {
        let d = deployment("saturn-crawler-high");
        let action = decide(&d, 3, 5);
        assert_eq!(action, ScaleAction::ScaleDown(2));
        let action_at_min = decide(&d, 2, 5);
        assert_eq!(action_at_min, ScaleAction::NoAction);
    }

    #[test]
    fn between_thresholds_is_no_action() {
        let d = deployment("saturn-crawler-high");
        assert_eq!(decide(&d, 4, 40), ScaleAction::NoAction);
    }

    #[tokio::test]
    async fn cooldown_suppresses_a_second_action_within_window() {
        let broker: Arc<dyn BrokerGateway> = Arc::new(InMemoryBroker::new());
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        orchestrator.seed("saturn-crawler-high", "default", 3);
        let task = saturn_broker::Task::new(
            "t1",
            "1m_realtime",
            saturn_broker::Market::new("CN"),
            "600000",
            saturn_broker::Priority::High,
            1,
        );
        for _ in 0..160 {
            broker.enqueue(task.clone(), 0).await.unwrap();
        }

        let mut config = AutoscalerConfig::default();
        config.cooldown = std::time::Duration::from_secs(120);
        let config = config.with_deployment(DeploymentConfig {
            queues: vec![saturn_broker::Priority::High.queue_name()],
            ..deployment("saturn-crawler-high")
        });
        let autoscaler = Autoscaler::new(broker, orchestrator.clone(), config);

        let first = autoscaler.tick().await;
        assert_eq!(first.get("saturn-crawler-high"), Some(&ScaleAction::ScaleUp(6)));

        let second = autoscaler.tick().await;
        assert_eq!(second.get("saturn-crawler-high"), Some(&ScaleAction::NoAction));
    }
}
