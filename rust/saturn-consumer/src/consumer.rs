// Task Consumer (§4.4): per-priority dequeue loops, bounded concurrency,
// dispatch under deadline, retry/terminal classification, deadline
// monitor and heartbeat loops.

#![allow(clippy::expect_used)]

use crate::config::WorkerConfig;
use crate::execution::ExecutionRecord;
use crate::registry::HandlerRegistry;
use chrono::Duration as ChronoDuration;
use saturn_broker::{BrokerGateway, Priority, StatusEvent, TaskStatus};
use saturn_injector::ResourceInjector;
use saturn_support::metrics::MetricsCollector;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

pub struct TaskConsumer {
    config: WorkerConfig,
    broker: Arc<dyn BrokerGateway>,
    injector: Arc<ResourceInjector>,
    registry: Arc<HandlerRegistry>,
    active: Arc<Mutex<HashMap<String, ExecutionRecord>>>,
    stats: Arc<MetricsCollector>,
    running: Arc<AtomicBool>,
    accepting_tasks: Arc<AtomicBool>,
}

impl TaskConsumer {
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn BrokerGateway>,
        injector: Arc<ResourceInjector>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            config,
            broker,
            injector,
            registry,
            active: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(MetricsCollector::new(256, chrono::Utc::now().timestamp())),
            running: Arc::new(AtomicBool::new(false)),
            accepting_tasks: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stats(&self) -> Arc<MetricsCollector> {
        self.stats.clone()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("active map mutex poisoned").len()
    }

    pub fn active_executions(&self) -> Vec<ExecutionRecord> {
        self.active
            .lock()
            .expect("active map mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn accepting_tasks(&self) -> bool {
        self.accepting_tasks.load(Ordering::SeqCst)
    }

    pub fn close_intake(&self) {
        self.accepting_tasks.store(false, Ordering::SeqCst);
    }

    pub fn broker(&self) -> Arc<dyn BrokerGateway> {
        self.broker.clone()
    }

    pub fn injector(&self) -> Arc<ResourceInjector> {
        self.injector.clone()
    }

    pub fn clear_active(&self) {
        self.active.lock().expect("active map mutex poisoned").clear();
    }

    /// Publishes the process-wide `worker:{worker_id}` registration
    /// record (§3, §6.3).
    pub async fn initialize(&self) -> crate::error::ConsumerResult<()> {
        let snapshot = serde_json::json!({
            "worker_id": self.config.worker_id,
            "max_concurrent_tasks": self.config.max_concurrent_tasks,
            "task_timeout_seconds": self.config.task_timeout.as_secs(),
            "supported_task_types": self.config.allowed_task_types,
            "supported_markets": self.config.allowed_markets,
            "queue_priorities": self.config.listened_priorities.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            "registered_at": chrono::Utc::now(),
        });
        self.broker
            .cache_set(
                &format!("worker:{}", self.config.worker_id),
                snapshot,
                self.config.worker_registration_ttl.as_secs(),
            )
            .await?;
        Ok(())
    }

    pub async fn deregister(&self) {
        let _ = self
            .broker
            .cache_delete(&format!("worker:{}", self.config.worker_id))
            .await;
    }

    /// Launches one dequeue loop per listened priority plus the
    /// heartbeat and deadline-monitor loops. Returns their join handles
    /// so callers (the drain controller, tests) can await shutdown.
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        let mut handles = Vec::new();

        for priority in self.config.listened_priorities.clone() {
            let consumer = self.clone();
            handles.push(tokio::spawn(async move {
                consumer.dequeue_loop(priority).await;
            }));
        }

        let heartbeat = self.clone();
        handles.push(tokio::spawn(async move {
            heartbeat.heartbeat_loop().await;
        }));

        let monitor = self.clone();
        handles.push(tokio::spawn(async move {
            monitor.deadline_monitor_loop().await;
        }));

        handles
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn dequeue_loop(self: Arc<Self>, priority: Priority) {
        while self.running.load(Ordering::SeqCst) && self.accepting_tasks.load(Ordering::SeqCst) {
            if self.active_count() >= self.config.max_concurrent_tasks {
                sleep(StdDuration::from_secs(1)).await;
                continue;
            }

            let task = match self
                .broker
                .dequeue(priority, self.config.dequeue_block_timeout.as_secs())
                .await
            {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "broker dequeue failed, backing off");
                    sleep(StdDuration::from_secs(5)).await;
                    continue;
                }
            };

            if !self.config.allows(&task.task_type, &task.market.0) {
                let downgraded = task.downgraded_to_low();
                if let Err(e) = self.broker.enqueue(downgraded, 60).await {
                    warn!(error = %e, task_id = %task.task_id, "failed to re-enqueue filter-rejected task");
                }
                continue;
            }

            let execution_id = Uuid::new_v4().to_string();
            let timeout = ChronoDuration::from_std(self.config.task_timeout).unwrap_or(ChronoDuration::seconds(30));
            let record = ExecutionRecord::new(execution_id.clone(), task, self.config.worker_id.clone(), timeout);
            self.active
                .lock()
                .expect("active map mutex poisoned")
                .insert(execution_id.clone(), record.clone());

            self.stats.record_consumed(chrono::Utc::now().timestamp());

            let consumer = self.clone();
            tokio::spawn(async move {
                consumer.dispatch(record).await;
            });
        }
    }

    /// Runs the handler for one execution record under its deadline and
    /// classifies the outcome (§4.4).
    async fn dispatch(self: Arc<Self>, record: ExecutionRecord) {
        let _ = self
            .broker
            .update_task_status(
                &record.task.task_id,
                TaskStatus::Running,
                HashMap::from([
                    ("worker_id".to_string(), serde_json::json!(record.worker_id)),
                    ("execution_id".to_string(), serde_json::json!(record.execution_id)),
                    ("started_at".to_string(), serde_json::json!(record.started_at)),
                ]),
            )
            .await;

        let context = match self
            .injector
            .prepare(&record.task.task_id, &record.task.task_type, &record.task.market.0)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                warn!(error = %e, task_id = %record.task.task_id, "injector prepare failed");
                self.finish_failure(&record, &format!("injector_error:{}", e)).await;
                return;
            }
        };

        let handler = self.registry.resolve(&record.task.task_type);
        let handler = match handler {
            Some(h) => h,
            None => {
                self.finish_no_handler(&record).await;
                return;
            }
        };

        let remaining = record
            .deadline
            .signed_duration_since(chrono::Utc::now())
            .to_std()
            .unwrap_or(StdDuration::from_secs(0));

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(remaining, handler.handle(&record.task, &context)).await;
        let duration_secs = started.elapsed().as_secs_f64();

        match outcome {
            Ok((true, _)) => {
                let _ = self
                    .broker
                    .update_task_status(
                        &record.task.task_id,
                        TaskStatus::Success,
                        HashMap::from([
                            ("completed_at".to_string(), serde_json::json!(chrono::Utc::now())),
                            ("duration".to_string(), serde_json::json!(duration_secs)),
                        ]),
                    )
                    .await;
                self.stats.record_success();
                self.injector.report_outcome(&context, true, duration_secs);
            }
            Ok((false, reason)) => {
                self.injector.report_outcome(&context, false, duration_secs);
                self.finish_failure(&record, reason.as_deref().unwrap_or("handler_failure")).await;
            }
            Err(_elapsed) => {
                self.injector.report_outcome(&context, false, duration_secs);
                self.finish_timeout(&record).await;
            }
        }

        self.active
            .lock()
            .expect("active map mutex poisoned")
            .remove(&record.execution_id);
    }

    async fn finish_no_handler(&self, record: &ExecutionRecord) {
        let _ = self
            .broker
            .update_task_status(
                &record.task.task_id,
                TaskStatus::Failed,
                HashMap::from([("error".to_string(), serde_json::json!("no_handler"))]),
            )
            .await;
        self.stats.record_failure();
        self.active
            .lock()
            .expect("active map mutex poisoned")
            .remove(&record.execution_id);
    }

    /// 4.4.fail: exponential backoff while retry budget remains, else
    /// terminal FAILED.
    async fn finish_failure(&self, record: &ExecutionRecord, error: &str) {
        let task = &record.task;
        if task.has_retry_budget() {
            let next = task.with_incremented_retry();
            let delay = saturn_support::handler_failure_backoff_secs(next.retry_count);
            let event = StatusEvent::new(&task.task_id, TaskStatus::Retry)
                .with_detail("error", error)
                .with_detail("retry_count", next.retry_count)
                .with_detail("delay", delay);
            let _ = saturn_broker::publish_status(self.broker.as_ref(), event).await;
            if let Err(e) = self.broker.enqueue(next, delay).await {
                warn!(error = %e, task_id = %task.task_id, "failed to re-enqueue after handler failure");
            }
            self.stats.record_retry();
        } else {
            let event = StatusEvent::new(&task.task_id, TaskStatus::Failed)
                .with_detail("error", error)
                .with_detail("final_retry_count", task.retry_count);
            let _ = saturn_broker::publish_status(self.broker.as_ref(), event).await;
            self.stats.record_failure();
        }
    }

    /// 4.4.timeout: fixed 300s backoff while retry budget remains, else
    /// terminal TIMEOUT.
    async fn finish_timeout(&self, record: &ExecutionRecord) {
        let task = &record.task;
        if task.has_retry_budget() {
            let next = task.with_incremented_retry();
            let delay = saturn_support::TIMEOUT_RETRY_DELAY_SECS;
            let event = StatusEvent::new(&task.task_id, TaskStatus::Retry)
                .with_detail("error", "timeout")
                .with_detail("retry_count", next.retry_count)
                .with_detail("delay", delay);
            let _ = saturn_broker::publish_status(self.broker.as_ref(), event).await;
            if let Err(e) = self.broker.enqueue(next, delay).await {
                warn!(error = %e, task_id = %task.task_id, "failed to re-enqueue after timeout");
            }
        } else {
            let event = StatusEvent::new(&task.task_id, TaskStatus::Timeout)
                .with_detail("final_retry_count", task.retry_count);
            let _ = saturn_broker::publish_status(self.broker.as_ref(), event).await;
        }
        self.stats.record_timeout();
    }

    /// Every 10s: surfaces executions whose deadline has already passed,
    /// covering handlers that fail to honor cooperative cancellation
    /// (§4.4 deadline-monitor loop). `tokio::time::timeout` in `dispatch`
    /// handles the common case; this is the defensive backstop.
    async fn deadline_monitor_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            sleep(self.config.deadline_scan_interval).await;
            let overdue: Vec<ExecutionRecord> = self
                .active
                .lock()
                .expect("active map mutex poisoned")
                .values()
                .filter(|r| r.is_past_deadline())
                .cloned()
                .collect();
            for record in overdue {
                warn!(task_id = %record.task.task_id, "deadline monitor found overdue execution");
                self.finish_timeout(&record).await;
                self.active
                    .lock()
                    .expect("active map mutex poisoned")
                    .remove(&record.execution_id);
            }
        }
    }

    /// Every 30s: publish a counters snapshot to `worker_status:{id}`
    /// and re-assert the `worker:{id}` registration (§4.4, §6.3).
    async fn heartbeat_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            sleep(self.config.heartbeat_interval).await;
            let snapshot = self.stats.stats();
            let payload = serde_json::json!({
                "running": self.running.load(Ordering::SeqCst),
                "active_tasks": self.active_count(),
                "stats": snapshot,
                "reported_at": chrono::Utc::now(),
            });
            if let Err(e) = self
                .broker
                .cache_set(
                    &format!("worker_status:{}", self.config.worker_id),
                    payload,
                    self.config.worker_status_ttl.as_secs(),
                )
                .await
            {
                warn!(error = %e, "failed to publish worker status heartbeat");
            }
            if let Err(e) = self.initialize().await {
                warn!(error = %e, "failed to re-assert worker registration");
            }
            info!(worker_id = %self.config.worker_id, active = self.active_count(), "heartbeat");
        }
    }
}
