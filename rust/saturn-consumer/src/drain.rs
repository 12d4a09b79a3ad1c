// Drain Controller (§4.5): single-shot state machine triggered by
// SIGTERM/SIGINT or an explicit stop(). Never blocks signal delivery
// longer than the fixed grace window; a second signal during DRAINING
// is ignored (idempotence).

use crate::consumer::TaskConsumer;
use saturn_broker::StatusEvent;
use saturn_broker::TaskStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    IntakeOpen,
    IntakeClosed,
    Draining,
    Requeuing,
    Cleaning,
    Done,
}

#[derive(Debug, Clone)]
pub struct DrainConfig {
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub cleanup_timeout: Duration,
    pub force_exit_delay: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(90),
            poll_interval: Duration::from_secs(5),
            cleanup_timeout: Duration::from_secs(15),
            force_exit_delay: Duration::from_secs(5),
        }
    }
}

pub struct DrainController {
    consumer: Arc<TaskConsumer>,
    config: DrainConfig,
    started: AtomicBool,
}

impl DrainController {
    pub fn new(consumer: Arc<TaskConsumer>, config: DrainConfig) -> Self {
        Self {
            consumer,
            config,
            started: AtomicBool::new(false),
        }
    }

    /// Runs the full drain sequence once. A second concurrent call is a
    /// no-op -- `started` makes the state machine idempotent under a
    /// duplicate signal.
    pub async fn run(&self) -> DrainState {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("drain already in progress, ignoring duplicate trigger");
            return DrainState::Draining;
        }

        info!("drain: INTAKE_CLOSED");
        self.consumer.close_intake();
        self.consumer.deregister().await;

        info!("drain: DRAINING");
        let deadline = tokio::time::Instant::now() + self.config.max_wait;
        while self.consumer.active_count() > 0 && tokio::time::Instant::now() < deadline {
            sleep(self.config.poll_interval).await;
        }

        info!("drain: REQUEUING");
        let survivors = self.consumer.active_executions();
        for record in survivors {
            let next = record.task.with_incremented_retry();
            match self.consumer.broker().enqueue(next.clone(), 0).await {
                Ok(()) => {
                    let event = StatusEvent::new(&next.task_id, TaskStatus::PendingRetry)
                        .with_detail("reason", "graceful_shutdown")
                        .with_detail("requeued_at", serde_json::json!(chrono::Utc::now()))
                        .with_detail("retry_count", next.retry_count);
                    let _ = saturn_broker::publish_status(self.consumer.broker().as_ref(), event).await;
                }
                Err(e) => {
                    warn!(error = %e, task_id = %next.task_id, "drain re-enqueue failed");
                    let event = StatusEvent::new(&next.task_id, TaskStatus::Failed)
                        .with_detail("reason", "requeue_failed");
                    let _ = saturn_broker::publish_status(self.consumer.broker().as_ref(), event).await;
                }
            }
        }
        self.consumer.clear_active();

        info!("drain: CLEANING");
        self.consumer.stop();
        let cleanup_timeout = self.config.cleanup_timeout;
        let injector = self.consumer.injector();
        let _ = tokio::time::timeout(cleanup_timeout, async move {
            injector.cleanup_expired();
        })
        .await;

        info!("drain: DONE");
        sleep(self.config.force_exit_delay).await;
        DrainState::Done
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::registry::{Handler, HandlerRegistry};
    use async_trait::async_trait;
    use saturn_broker::{InMemoryBroker, Market, Priority, Task};
    use saturn_injector::{
        CredentialPoolClient, CredentialResource, InjectionContext, InjectorConfig, InjectorResult,
        ProxyPoolClient, ProxyResource, QualityTier, ResourceInjector,
    };
    use std::time::Duration as StdDuration;

    struct NoopProxyPool;
    #[async_trait]
    impl ProxyPoolClient for NoopProxyPool {
        async fn fetch_proxy(&self, _market: &str, _tier: QualityTier) -> InjectorResult<Option<ProxyResource>> {
            Ok(None)
        }
    }

    struct NoopCredentialPool;
    #[async_trait]
    impl CredentialPoolClient for NoopCredentialPool {
        async fn fetch_credential(&self, _market: &str) -> InjectorResult<Option<CredentialResource>> {
            Ok(None)
        }
    }

    /// A handler that never returns within any test-scale deadline, so its
    /// execution is still active when the drain window expires (§8 scenario 5).
    struct NeverFinishes;
    #[async_trait]
    impl Handler for NeverFinishes {
        async fn handle(&self, _task: &Task, _context: &InjectionContext) -> (bool, Option<String>) {
            tokio::time::sleep(StdDuration::from_secs(3600)).await;
            (true, None)
        }
    }

    fn test_consumer() -> (Arc<TaskConsumer>, Arc<InMemoryBroker>) {
        let broker = Arc::new(InMemoryBroker::new());
        let broker_dyn: Arc<dyn saturn_broker::BrokerGateway> = broker.clone();
        let injector = Arc::new(ResourceInjector::new(
            Box::new(NoopProxyPool),
            Box::new(NoopCredentialPool),
            InjectorConfig::default(),
        ));
        let mut registry = HandlerRegistry::new();
        registry.set_default(Arc::new(NeverFinishes));
        let mut config = WorkerConfig::default();
        config.task_timeout = StdDuration::from_secs(3600);
        config.dequeue_block_timeout = StdDuration::from_millis(20);
        let consumer = Arc::new(TaskConsumer::new(config, broker_dyn, injector, Arc::new(registry)));
        (consumer, broker)
    }

    #[tokio::test]
    async fn drain_requeues_in_flight_task_that_outlives_max_wait() {
        let (consumer, broker) = test_consumer();
        let task = Task::new("T5", "1m_realtime", Market::new("CN"), "600000", Priority::High, 3);
        broker.enqueue(task, 0).await.unwrap();

        let handles = consumer.clone().start();
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(consumer.active_count(), 1);

        let drain = DrainController::new(
            consumer.clone(),
            DrainConfig {
                max_wait: StdDuration::from_millis(50),
                poll_interval: StdDuration::from_millis(10),
                cleanup_timeout: StdDuration::from_millis(50),
                force_exit_delay: StdDuration::from_millis(10),
            },
        );
        let final_state = drain.run().await;
        assert_eq!(final_state, DrainState::Done);
        assert_eq!(consumer.active_count(), 0);
        assert!(!consumer.accepting_tasks());

        let events = broker.status_log();
        assert!(events
            .iter()
            .any(|e| e.task_id == "T5" && e.status == saturn_broker::TaskStatus::PendingRetry));

        let requeued_depth = broker.queue_depth(&Priority::High.queue_name()).await.unwrap();
        assert_eq!(requeued_depth, 1, "survivor must be re-queued at its original priority");

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn second_drain_call_is_ignored_once_the_first_completed() {
        let (consumer, _broker) = test_consumer();
        let drain = DrainController::new(
            consumer,
            DrainConfig {
                max_wait: StdDuration::from_millis(20),
                poll_interval: StdDuration::from_millis(5),
                cleanup_timeout: StdDuration::from_millis(10),
                force_exit_delay: StdDuration::from_millis(1),
            },
        );
        assert_eq!(drain.run().await, DrainState::Done);
        assert_eq!(drain.run().await, DrainState::Draining);
    }
}
