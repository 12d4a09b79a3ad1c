use crate::resource::QualityTier;
use std::time::Duration;

/// Per-task-type policy: proxy quality tier, credential freshness
/// requirement and timeout, read straight off the task's `task_type` tag
/// (§4.2). Unknown task types fall back to the default policy rather
/// than failing -- the handler registry, not the injector, is the place
/// that rejects genuinely unsupported types.
#[derive(Debug, Clone, Copy)]
pub struct TaskTypePolicy {
    pub quality_tier: QualityTier,
    pub requires_fresh_credential: bool,
    pub timeout: Duration,
}

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const HANDLER_DEFAULT_PATH_CAP_SECS: u64 = 45;

impl TaskTypePolicy {
    pub fn for_task_type(task_type: &str) -> Self {
        match task_type {
            "1m_realtime" => Self {
                quality_tier: QualityTier::High,
                requires_fresh_credential: true,
                timeout: Duration::from_secs(5),
            },
            "5m_realtime" => Self {
                quality_tier: QualityTier::High,
                requires_fresh_credential: true,
                timeout: Duration::from_secs(10),
            },
            "15m_realtime" => Self {
                quality_tier: QualityTier::Medium,
                requires_fresh_credential: true,
                timeout: Duration::from_secs(15),
            },
            "15m_backfill" => Self {
                quality_tier: QualityTier::Medium,
                requires_fresh_credential: false,
                timeout: Duration::from_secs(30),
            },
            "1d_backfill" => Self {
                quality_tier: QualityTier::Low,
                requires_fresh_credential: false,
                timeout: Duration::from_secs(60),
            },
            _ => Self {
                quality_tier: QualityTier::Medium,
                requires_fresh_credential: false,
                timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            },
        }
    }

    /// Per-task timeout clamped to [5s, 45s], the bound the default
    /// handler path (§4.3) enforces regardless of the task-type ladder.
    pub fn clamped_handler_timeout(&self) -> Duration {
        self.timeout
            .max(Duration::from_secs(5))
            .min(Duration::from_secs(HANDLER_DEFAULT_PATH_CAP_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_1m_maps_to_high_quality_and_5s_timeout() {
        let policy = TaskTypePolicy::for_task_type("1m_realtime");
        assert_eq!(policy.quality_tier, QualityTier::High);
        assert!(policy.requires_fresh_credential);
        assert_eq!(policy.timeout, Duration::from_secs(5));
    }

    #[test]
    fn day_backfill_maps_to_low_quality_and_accepts_cached_credential() {
        let policy = TaskTypePolicy::for_task_type("1d_backfill");
        assert_eq!(policy.quality_tier, QualityTier::Low);
        assert!(!policy.requires_fresh_credential);
    }

    #[test]
    fn clamped_handler_timeout_never_exceeds_45s() {
        let policy = TaskTypePolicy::for_task_type("1d_backfill");
        assert_eq!(policy.clamped_handler_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn clamped_handler_timeout_never_below_5s() {
        let policy = TaskTypePolicy::for_task_type("1m_realtime");
        assert_eq!(policy.clamped_handler_timeout(), Duration::from_secs(5));
    }
}
