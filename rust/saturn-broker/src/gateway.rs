use crate::error::BrokerResult;
use crate::task::{Priority, StatusEvent, Task, TaskStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// The black-box queue backend the core depends on. Everything above this
/// trait -- consumer, drain controller, autoscaler -- is backend-agnostic.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn enqueue(&self, task: Task, delay_seconds: u64) -> BrokerResult<()>;

    /// Blocks up to `block_timeout_secs` waiting for a task at the exact
    /// priority given. Returns `Ok(None)` on an empty wait, never an error
    /// for "nothing available" -- that is not a failure condition.
    async fn dequeue(&self, priority: Priority, block_timeout_secs: u64) -> BrokerResult<Option<Task>>;

    async fn update_task_status(&self, task_id: &str, status: TaskStatus, details: HashMap<String, Value>) -> BrokerResult<()>;

    async fn cache_set(&self, key: &str, value: Value, ttl_seconds: u64) -> BrokerResult<()>;

    async fn cache_get(&self, key: &str) -> BrokerResult<Option<Value>>;

    async fn cache_delete(&self, key: &str) -> BrokerResult<()>;

    /// Non-blocking depth read used by the autoscaler.
    async fn queue_depth(&self, queue_name: &str) -> BrokerResult<u64>;
}

/// Convenience helper built on top of `update_task_status` -- most call
/// sites publish a single status event rather than building the details
/// map by hand.
pub async fn publish_status(
    broker: &dyn BrokerGateway,
    event: StatusEvent,
) -> BrokerResult<()> {
    broker
        .update_task_status(&event.task_id, event.status, event.details)
        .await
}
