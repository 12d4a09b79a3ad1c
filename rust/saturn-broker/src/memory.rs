// In-memory reference implementation of the Broker Gateway contract:
// priority-segmented FIFO queues behind a mutex, a delayed-item min-heap
// pumped on its own tick, and a KV cache with per-key expiry. Exists so
// the rest of the core is exercisable without a real broker process.

#![allow(clippy::expect_used)]

use crate::error::BrokerResult;
use crate::gateway::BrokerGateway;
use crate::task::{Priority, StatusEvent, Task, TaskStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::sleep;

struct DelayedItem {
    visible_at: Instant,
    task: Task,
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

struct State {
    queues: HashMap<Priority, VecDeque<Task>>,
    delayed: BinaryHeap<Reverse<DelayedKey>>,
    delayed_items: HashMap<u64, DelayedItem>,
    next_delayed_id: u64,
    cache: HashMap<String, CacheEntry>,
    status_log: Vec<StatusEvent>,
}

#[derive(PartialEq, Eq)]
struct DelayedKey {
    visible_at_millis: u128,
    id: u64,
}

impl PartialOrd for DelayedKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.visible_at_millis
            .cmp(&other.visible_at_millis)
            .then(self.id.cmp(&other.id))
    }
}

/// In-process broker used by tests and by single-node deployments that
/// don't need a shared external queue. All four priority queues are
/// independent; a dequeue on one priority never observes another's items.
pub struct InMemoryBroker {
    state: Mutex<State>,
    notify: Notify,
    started_at: Instant,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let mut queues = HashMap::new();
        for p in [Priority::Critical, Priority::High, Priority::Normal, Priority::Low] {
            queues.insert(p, VecDeque::new());
        }
        Self {
            state: Mutex::new(State {
                queues,
                delayed: BinaryHeap::new(),
                delayed_items: HashMap::new(),
                next_delayed_id: 0,
                cache: HashMap::new(),
                status_log: Vec::new(),
            }),
            notify: Notify::new(),
            started_at: Instant::now(),
        }
    }

    /// Moves any delayed items whose visibility time has passed into
    /// their priority queue. Called opportunistically by dequeue/enqueue
    /// and by the caller's own background pump if one is run.
    pub fn pump_delayed(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("broker state mutex poisoned");
        let mut became_visible = Vec::new();
        while let Some(Reverse(key)) = state.delayed.peek() {
            let due = self.started_at + Duration::from_millis(key.visible_at_millis as u64);
            if due > now {
                break;
            }
            let Reverse(key) = state.delayed.pop().expect("peeked entry must pop");
            if let Some(item) = state.delayed_items.remove(&key.id) {
                became_visible.push(item.task);
            }
        }
        let any_became_visible = !became_visible.is_empty();
        for task in became_visible {
            state
                .queues
                .entry(task.priority)
                .or_insert_with(VecDeque::new)
                .push_back(task);
        }
        drop(state);
        if any_became_visible {
            self.notify.notify_waiters();
        }
    }

    /// Full status log, for tests asserting on the sequence of events.
    pub fn status_log(&self) -> Vec<StatusEvent> {
        self.state
            .lock()
            .expect("broker state mutex poisoned")
            .status_log
            .clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerGateway for InMemoryBroker {
    async fn enqueue(&self, task: Task, delay_seconds: u64) -> BrokerResult<()> {
        if delay_seconds == 0 {
            let mut state = self.state.lock().expect("broker state mutex poisoned");
            state
                .queues
                .entry(task.priority)
                .or_insert_with(VecDeque::new)
                .push_back(task);
            drop(state);
            self.notify.notify_waiters();
            return Ok(());
        }

        let mut state = self.state.lock().expect("broker state mutex poisoned");
        let id = state.next_delayed_id;
        state.next_delayed_id += 1;
        let visible_at = Instant::now() + Duration::from_secs(delay_seconds);
        let visible_at_millis = visible_at.saturating_duration_since(self.started_at).as_millis();
        state.delayed.push(Reverse(DelayedKey { visible_at_millis, id }));
        state.delayed_items.insert(id, DelayedItem { visible_at, task });
        Ok(())
    }

    async fn dequeue(&self, priority: Priority, block_timeout_secs: u64) -> BrokerResult<Option<Task>> {
        let deadline = Instant::now() + Duration::from_secs(block_timeout_secs);
        loop {
            self.pump_delayed();
            {
                let mut state = self.state.lock().expect("broker state mutex poisoned");
                if let Some(queue) = state.queues.get_mut(&priority) {
                    if let Some(task) = queue.pop_front() {
                        return Ok(Some(task));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait = remaining.min(Duration::from_millis(100));
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = sleep(wait) => {}
            }
        }
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        details: HashMap<String, Value>,
    ) -> BrokerResult<()> {
        let mut state = self.state.lock().expect("broker state mutex poisoned");
        let mut event = StatusEvent::new(task_id, status);
        event.details = details;
        state.status_log.push(event);
        Ok(())
    }

    async fn cache_set(&self, key: &str, value: Value, ttl_seconds: u64) -> BrokerResult<()> {
        let mut state = self.state.lock().expect("broker state mutex poisoned");
        state.cache.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn cache_get(&self, key: &str) -> BrokerResult<Option<Value>> {
        let mut state = self.state.lock().expect("broker state mutex poisoned");
        if let Some(entry) = state.cache.get(key) {
            if entry.expires_at < Instant::now() {
                state.cache.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn cache_delete(&self, key: &str) -> BrokerResult<()> {
        self.state.lock().expect("broker state mutex poisoned").cache.remove(key);
        Ok(())
    }

    async fn queue_depth(&self, queue_name: &str) -> BrokerResult<u64> {
        let state = self.state.lock().expect("broker state mutex poisoned");
        for (priority, queue) in state.queues.iter() {
            if priority.queue_name() == queue_name {
                return Ok(queue.len() as u64);
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips_stable_fields() {
        let broker = InMemoryBroker::new();
        let task = Task::new("T1", "1m_realtime", crate::task::Market::new("CN"), "600000", Priority::High, 3);
        broker.enqueue(task.clone(), 0).await.unwrap();
        let got = broker.dequeue(Priority::High, 1).await.unwrap().unwrap();
        assert_eq!(got.task_id, task.task_id);
        assert_eq!(got.market, task.market);
    }

    #[tokio::test]
    async fn dequeue_on_empty_queue_returns_none_after_timeout() {
        let broker = InMemoryBroker::new();
        let got = broker.dequeue(Priority::Low, 0).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn independent_priority_queues_do_not_cross_deliver() {
        let broker = InMemoryBroker::new();
        let task = Task::new("T2", "5m_realtime", crate::task::Market::new("US"), "AAPL", Priority::Critical, 1);
        broker.enqueue(task, 0).await.unwrap();
        let got = broker.dequeue(Priority::High, 0).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn cache_entries_expire_after_ttl() {
        let broker = InMemoryBroker::new();
        broker.cache_set("k", Value::String("v".into()), 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let got = broker.cache_get("k").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn queue_depth_reflects_pending_items() {
        let broker = InMemoryBroker::new();
        let task = Task::new("T3", "1d_backfill", crate::task::Market::new("HK"), "0700", Priority::Low, 2);
        broker.enqueue(task, 0).await.unwrap();
        let depth = broker.queue_depth(&Priority::Low.queue_name()).await.unwrap();
        assert_eq!(depth, 1);
    }
}
