use chrono::{DateTime, Utc};
use saturn_broker::Task;

/// Worker-local record of one in-flight task. Created on dispatch,
/// destroyed on termination (§3). Never persisted or shared across
/// workers.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub task: Task,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(execution_id: String, task: Task, worker_id: String, timeout: chrono::Duration) -> Self {
        let started_at = Utc::now();
        Self {
            execution_id,
            task,
            worker_id,
            started_at,
            deadline: started_at + timeout,
        }
    }

    pub fn is_past_deadline(&self) -> bool {
        Utc::now() > self.deadline
    }
}
