// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for git invocations and task executions.
//!
//! Lightweight in-process counters and latency histograms, with no exporter.
//! Recording sites are compiled in only with the `telemetry` feature.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Timed operations by name (`git.worktree`, `git.merge`, ...).
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Executor outcomes.
    tasks: RwLock<TaskMetrics>,

    /// Start time for calculating uptime.
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            tasks: RwLock::new(TaskMetrics::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a generic operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        let metrics = ops.entry(name.to_string()).or_insert_with(OperationMetrics::new);
        metrics.record(duration);
    }

    /// Record one executor run and whether it succeeded.
    pub fn record_task(&self, duration: Duration, success: bool) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record(duration, success);
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Get task execution metrics.
    pub fn task_metrics(&self) -> TaskMetrics {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations: self
                .operations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            tasks: self.task_metrics(),
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.tasks.write().unwrap_or_else(PoisonError::into_inner) = TaskMetrics::new();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Executor run metrics.
#[derive(Debug, Clone)]
pub struct TaskMetrics {
    /// Runs that reached the executor and finished.
    pub executions: u64,

    pub completed: u64,

    pub failed: u64,

    /// Executor latency distribution.
    pub histogram: Histogram,

    pub total_duration: Duration,
}

impl TaskMetrics {
    pub fn new() -> Self {
        Self {
            executions: 0,
            completed: 0,
            failed: 0,
            // Agent runs take seconds to hours: 1s, 10s, 1m, 5m, 30m
            histogram: Histogram::with_buckets(vec![
                1_000_000,
                10_000_000,
                60_000_000,
                300_000_000,
                1_800_000_000,
            ]),
            total_duration: Duration::ZERO,
        }
    }

    pub fn record(&mut self, duration: Duration, success: bool) {
        self.executions += 1;
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.total_duration += duration;
        self.histogram.record(duration);
    }

    /// Calculate average execution time.
    pub fn avg_duration(&self) -> Duration {
        if self.executions == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.executions as u32
        }
    }

    /// Calculate success rate (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            1.0
        } else {
            self.completed as f64 / self.executions as f64
        }
    }
}

impl Default for TaskMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Generic operation metrics with histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    /// Number of operations.
    pub count: u64,

    /// Total duration.
    pub total_duration: Duration,

    /// Minimum duration.
    pub min_duration: Duration,

    /// Maximum duration.
    pub max_duration: Duration,

    /// Histogram buckets for latency distribution.
    pub histogram: Histogram,
}

impl OperationMetrics {
    /// Create new operation metrics.
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    /// Record an operation.
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    /// Calculate average duration.
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple histogram with fixed buckets for latency tracking.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket boundaries in microseconds.
    /// Default: [100us, 1ms, 10ms, 100ms, 1s, 10s, +inf]
    buckets: Vec<u64>,

    /// Count per bucket.
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in microseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    /// Record a duration value.
    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[bucket_idx] += 1;
    }

    /// Get counts for each bucket.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Get bucket boundaries.
    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Calculate approximate percentile (p50, p90, p99, etc.).
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                // Return the bucket boundary (or a large value for the overflow bucket)
                let micros = if i < self.buckets.len() {
                    self.buckets[i]
                } else {
                    self.buckets.last().copied().unwrap_or(0) * 10
                };
                return Duration::from_micros(micros);
            }
        }

        Duration::ZERO
    }

    /// Get p50 (median) latency.
    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    /// Get p90 latency.
    pub fn p90(&self) -> Duration {
        self.percentile(90.0)
    }

    /// Get p99 latency.
    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Default buckets: 100us, 1ms, 10ms, 100ms, 1s, 10s
        Self::with_buckets(vec![100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000])
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Operation metrics by name.
    pub operations: HashMap<String, OperationMetrics>,

    pub tasks: TaskMetrics,

    /// Uptime when snapshot was taken.
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Metrics Report ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Tasks: {} run, {} completed, {} failed, avg {:.2?}\n\n",
            self.tasks.executions,
            self.tasks.completed,
            self.tasks.failed,
            self.tasks.avg_duration()
        ));

        if !self.operations.is_empty() {
            let mut names: Vec<&String> = self.operations.keys().collect();
            names.sort();
            report.push_str("Operation Metrics:\n");
            for name in names {
                let metrics = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
        }

        report
    }
}

/// Convenience function to record an operation to global metrics.
pub fn record_operation(name: &str, duration: Duration) {
    GLOBAL_METRICS.record_operation(name, duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_metrics() {
        let mut metrics = TaskMetrics::new();
        metrics.record(Duration::from_secs(2), true);
        metrics.record(Duration::from_secs(4), true);
        metrics.record(Duration::from_secs(30), false);

        assert_eq!(metrics.executions, 3);
        assert_eq!(metrics.completed, 2);
        assert_eq!(metrics.failed, 1);
        assert!((metrics.success_rate() - 0.666).abs() < 0.01);
        assert_eq!(metrics.avg_duration(), Duration::from_secs(12));
    }

    #[test]
    fn test_operation_metrics() {
        let mut metrics = OperationMetrics::new();
        metrics.record(Duration::from_millis(10));
        metrics.record(Duration::from_millis(20));
        metrics.record(Duration::from_millis(30));

        assert_eq!(metrics.count, 3);
        assert_eq!(metrics.avg_duration(), Duration::from_millis(20));
        assert_eq!(metrics.min_duration, Duration::from_millis(10));
    }

    #[test]
    fn test_histogram_percentiles() {
        let mut hist = Histogram::default();
        for _ in 0..100 {
            hist.record(Duration::from_micros(500));
        }

        assert_eq!(hist.p50(), Duration::from_micros(1_000));
        assert_eq!(hist.p99(), Duration::from_micros(1_000));
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = Metrics::new();
        metrics.record_operation("git.worktree", Duration::from_millis(40));
        metrics.record_task(Duration::from_secs(1), false);

        let snapshot = metrics.snapshot();
        assert!(snapshot.operations.contains_key("git.worktree"));
        assert_eq!(snapshot.tasks.failed, 1);
        assert!(snapshot.format_report().contains("git.worktree"));

        metrics.reset();
        assert!(metrics.operation_metrics("git.worktree").is_none());
        assert_eq!(metrics.task_metrics().executions, 0);
    }
}
