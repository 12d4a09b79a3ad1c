// saturn-support: worker statistics collection.
//
// Tracks the counters the consumer publishes into `worker_status:{id}`
// on its heartbeat (consumed, successful, failed, timeout, retry) plus
// latency sampling used for diagnostics.

// Mutex poisoning here means a prior holder panicked mid-update; there is
// no sane partial state to recover, so we propagate the panic.
#![allow(clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub consumed: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeout: u64,
    pub retry: u64,
    pub start_time: Option<i64>,
    pub last_task_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LatencyMetrics {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl Default for LatencyMetrics {
    fn default() -> Self {
        Self {
            p50_ms: 0,
            p95_ms: 0,
            p99_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub stats: WorkerStats,
    pub latency: LatencyMetrics,
}

/// Shared counters for one worker process. Cheap to clone (wraps `Arc`s).
pub struct MetricsCollector {
    stats: Arc<Mutex<WorkerStats>>,
    latencies: Arc<Mutex<VecDeque<u64>>>,
    max_latency_samples: usize,
}

impl MetricsCollector {
    /// `start_time` is the worker process's own start timestamp (epoch
    /// seconds), published verbatim in every `worker_status:{id}` heartbeat.
    pub fn new(max_latency_samples: usize, start_time: i64) -> Self {
        Self {
            stats: Arc::new(Mutex::new(WorkerStats {
                start_time: Some(start_time),
                ..WorkerStats::default()
            })),
            latencies: Arc::new(Mutex::new(VecDeque::with_capacity(max_latency_samples))),
            max_latency_samples,
        }
    }

    pub fn record_consumed(&self, at_epoch_secs: i64) {
        let mut stats = self.stats.lock().expect("stats mutex poisoned");
        stats.consumed += 1;
        stats.last_task_at = Some(at_epoch_secs);
    }

    pub fn record_success(&self) {
        self.stats.lock().expect("stats mutex poisoned").successful += 1;
    }

    pub fn record_failure(&self) {
        self.stats.lock().expect("stats mutex poisoned").failed += 1;
    }

    pub fn record_timeout(&self) {
        self.stats.lock().expect("stats mutex poisoned").timeout += 1;
    }

    pub fn record_retry(&self) {
        self.stats.lock().expect("stats mutex poisoned").retry += 1;
    }

    pub fn record_latency(&self, latency_ms: u64) {
        let mut latencies = self.latencies.lock().expect("latency mutex poisoned");
        latencies.push_back(latency_ms);
        if latencies.len() > self.max_latency_samples {
            latencies.pop_front();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().expect("stats mutex poisoned").clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let stats = self.stats();
        let mut samples: Vec<u64> = self
            .latencies
            .lock()
            .expect("latency mutex poisoned")
            .iter()
            .copied()
            .collect();
        samples.sort_unstable();

        let latency = if samples.is_empty() {
            LatencyMetrics::default()
        } else {
            let idx = |pct: f64| ((samples.len() as f64 - 1.0) * pct).round() as usize;
            LatencyMetrics {
                p50_ms: samples[idx(0.50)],
                p95_ms: samples[idx(0.95)],
                p99_ms: samples[idx(0.99)],
            }
        };

        MetricsSnapshot { stats, latency }
    }
}

/// Measures wall-clock duration and records it into the collector on drop.
pub struct LatencyTimer {
    start: Instant,
    collector: Arc<MetricsCollector>,
}

impl LatencyTimer {
    pub fn start(collector: Arc<MetricsCollector>) -> Self {
        Self {
            start: Instant::now(),
            collector,
        }
    }

    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        self.collector.record_latency(duration.as_millis() as u64);
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let collector = MetricsCollector::new(16, 1_699_999_000);
        collector.record_consumed(1_700_000_000);
        collector.record_success();
        collector.record_retry();
        collector.record_latency(10);
        collector.record_latency(20);

        let snap = collector.snapshot();
        assert_eq!(snap.stats.consumed, 1);
        assert_eq!(snap.stats.successful, 1);
        assert_eq!(snap.stats.retry, 1);
        assert_eq!(snap.stats.start_time, Some(1_699_999_000));
        assert_eq!(snap.stats.last_task_at, Some(1_700_000_000));
        assert!(snap.latency.p50_ms > 0);
    }

    #[test]
    fn latency_ring_buffer_is_bounded() {
        let collector = MetricsCollector::new(2, 1_699_999_000);
        collector.record_latency(1);
        collector.record_latency(2);
        collector.record_latency(3);
        let snap = collector.snapshot();
        // only the last 2 samples remain, so p99 is 3
        assert_eq!(snap.latency.p99_ms, 3);
    }
}
