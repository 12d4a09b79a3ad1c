use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Priority level a task is queued under. Ord is derived in declaration
/// order (CRITICAL highest) so `listened_priorities` can be sorted and
/// compared directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
        }
    }

    pub fn queue_name(&self) -> String {
        format!("crawler_tasks:{}", self.as_str())
    }
}

/// Market tag. Kept as an open string wrapper rather than a closed enum:
/// new venues are added by configuration, not by a core rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Market(pub String);

impl Market {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
    Retry,
    Cancelled,
    PendingRetry,
}

impl TaskStatus {
    /// RUNNING and RETRY are the only non-terminal states once a task has
    /// been dispatched at least once.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }
}

/// Unit of work. `task_id` is stable across retries and redeliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_type: String,
    pub market: Market,
    pub symbol: String,
    pub timeframe: Option<String>,
    pub payload: Value,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
    pub requested_deadline: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        task_type: impl Into<String>,
        market: Market,
        symbol: impl Into<String>,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            market,
            symbol: symbol.into(),
            timeframe: None,
            payload: Value::Object(serde_json::Map::new()),
            priority,
            retry_count: 0,
            max_retries,
            enqueued_at: Utc::now(),
            requested_deadline: None,
        }
    }

    /// Returns a copy with `retry_count` incremented, clamped so the
    /// invariant `retry_count <= max_retries` can never be violated by a
    /// caller that forgets to check the budget first.
    pub fn with_incremented_retry(&self) -> Self {
        let mut next = self.clone();
        next.retry_count = (next.retry_count + 1).min(next.max_retries);
        next
    }

    pub fn downgraded_to_low(&self) -> Self {
        let mut next = self.clone();
        next.priority = Priority::Low;
        next
    }

    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Status event appended to the broker's status log for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub task_id: String,
    pub status: TaskStatus,
    pub details: HashMap<String, Value>,
    pub ts: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            details: HashMap::new(),
            ts: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_critical_first() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
    }

    #[test]
    fn with_incremented_retry_never_exceeds_max() {
        let task = Task::new("t1", "1m_realtime", Market::new("CN"), "AAPL", Priority::High, 1);
        let once = task.with_incremented_retry();
        assert_eq!(once.retry_count, 1);
        let twice = once.with_incremented_retry();
        assert_eq!(twice.retry_count, 1);
    }

    #[test]
    fn downgraded_to_low_always_routes_low_regardless_of_original() {
        let task = Task::new("t2", "1d_backfill", Market::new("JP"), "7203", Priority::Critical, 3);
        assert_eq!(task.downgraded_to_low().priority, Priority::Low);
    }
}
