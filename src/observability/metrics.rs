//! Thread-safe metrics collection system
//!
//! Atomic counters for routing outcomes, signal health, plan execution, and
//! learning feedback, plus a bounded window of classification latencies.

use crate::types::{DecisionSource, SignalSource};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_LATENCY_SAMPLES: usize = 1000;

const DECISION_SOURCES: [DecisionSource; 6] = [
    DecisionSource::Pattern,
    DecisionSource::Semantic,
    DecisionSource::Llm,
    DecisionSource::Guard,
    DecisionSource::SelfValidation,
    DecisionSource::None,
];

const SIGNAL_SOURCES: [SignalSource; 3] =
    [SignalSource::Pattern, SignalSource::Semantic, SignalSource::Llm];

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and a mutex-protected window
pub struct MetricsCollector {
    decisions_by_source: [AtomicU64; 6],
    guard_overrides: AtomicU64,
    clarifications: AtomicU64,
    self_validation_runs: AtomicU64,
    self_validation_corrections: AtomicU64,
    signal_failures: [AtomicU64; 3],

    plans_executed: AtomicU64,
    plans_completed: AtomicU64,
    plans_partial: AtomicU64,
    plans_failed: AtomicU64,
    plans_cancelled: AtomicU64,
    steps_failed: AtomicU64,
    steps_skipped: AtomicU64,

    corrections_recorded: AtomicU64,
    successes_recorded: AtomicU64,
    persistence_failures: AtomicU64,

    // in milliseconds
    classification_times: Mutex<Vec<u64>>,
    started_at: AtomicU64,
}

fn decision_index(source: DecisionSource) -> usize {
    match source {
        DecisionSource::Pattern => 0,
        DecisionSource::Semantic => 1,
        DecisionSource::Llm => 2,
        DecisionSource::Guard => 3,
        DecisionSource::SelfValidation => 4,
        DecisionSource::None => 5,
    }
}

fn signal_index(source: SignalSource) -> usize {
    match source {
        SignalSource::Pattern => 0,
        SignalSource::Semantic => 1,
        SignalSource::Llm => 2,
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            decisions_by_source: Default::default(),
            guard_overrides: AtomicU64::new(0),
            clarifications: AtomicU64::new(0),
            self_validation_runs: AtomicU64::new(0),
            self_validation_corrections: AtomicU64::new(0),
            signal_failures: Default::default(),
            plans_executed: AtomicU64::new(0),
            plans_completed: AtomicU64::new(0),
            plans_partial: AtomicU64::new(0),
            plans_failed: AtomicU64::new(0),
            plans_cancelled: AtomicU64::new(0),
            steps_failed: AtomicU64::new(0),
            steps_skipped: AtomicU64::new(0),
            corrections_recorded: AtomicU64::new(0),
            successes_recorded: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            classification_times: Mutex::new(Vec::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Routing metrics
    pub fn decision_made(&self, source: DecisionSource, duration: Duration) {
        self.decisions_by_source[decision_index(source)].fetch_add(1, Ordering::Relaxed);
        if source == DecisionSource::Guard {
            self.guard_overrides.fetch_add(1, Ordering::Relaxed);
        }
        self.record_classification_time(duration);
    }

    pub fn clarification_requested(&self) {
        self.clarifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn self_validation_run(&self, corrected: bool) {
        self.self_validation_runs.fetch_add(1, Ordering::Relaxed);
        if corrected {
            self.self_validation_corrections
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn signal_failed(&self, source: SignalSource) {
        self.signal_failures[signal_index(source)].fetch_add(1, Ordering::Relaxed);
    }

    fn record_classification_time(&self, duration: Duration) {
        if let Ok(mut times) = self.classification_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_LATENCY_SAMPLES {
                times.remove(0);
            }
        }
    }

    // Plan metrics
    pub fn plan_finished(&self, completed: usize, failed: usize, skipped: usize, cancelled: bool) {
        self.plans_executed.fetch_add(1, Ordering::Relaxed);
        self.steps_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        self.steps_skipped
            .fetch_add(skipped as u64, Ordering::Relaxed);

        let counter = if cancelled {
            &self.plans_cancelled
        } else if failed == 0 && skipped == 0 {
            &self.plans_completed
        } else if completed > 0 {
            &self.plans_partial
        } else {
            &self.plans_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // Learning metrics
    pub fn correction_recorded(&self) {
        self.corrections_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success_recorded(&self) {
        self.successes_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persistence_failed(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        let counters = self
            .decisions_by_source
            .iter()
            .chain(self.signal_failures.iter())
            .chain([
                &self.guard_overrides,
                &self.clarifications,
                &self.self_validation_runs,
                &self.self_validation_corrections,
                &self.plans_executed,
                &self.plans_completed,
                &self.plans_partial,
                &self.plans_failed,
                &self.plans_cancelled,
                &self.steps_failed,
                &self.steps_skipped,
                &self.corrections_recorded,
                &self.successes_recorded,
                &self.persistence_failures,
            ]);
        for counter in counters {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut times) = self.classification_times.lock() {
            times.clear();
        }
        self.started_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Calculate latency statistics (avg, p50, p95, p99)
    fn calculate_latency_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.classification_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
            percentile(&sorted_times, 99.0),
        )
    }

    /// Take a serializable point-in-time snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95, p99) = self.calculate_latency_statistics();

        let decisions_by_source = DECISION_SOURCES
            .iter()
            .map(|source| {
                (
                    source.as_str().to_string(),
                    self.decisions_by_source[decision_index(*source)].load(Ordering::Relaxed),
                )
            })
            .collect::<BTreeMap<_, _>>();

        let signal_failures = SIGNAL_SOURCES
            .iter()
            .map(|source| {
                (
                    source.as_str().to_string(),
                    self.signal_failures[signal_index(*source)].load(Ordering::Relaxed),
                )
            })
            .collect::<BTreeMap<_, _>>();

        MetricsSnapshot {
            routing: RoutingMetrics {
                total_decisions: decisions_by_source.values().sum(),
                decisions_by_source,
                guard_overrides: self.guard_overrides.load(Ordering::Relaxed),
                clarifications: self.clarifications.load(Ordering::Relaxed),
                self_validation_runs: self.self_validation_runs.load(Ordering::Relaxed),
                self_validation_corrections: self
                    .self_validation_corrections
                    .load(Ordering::Relaxed),
                signal_failures,
                avg_classification_time_ms: avg,
                classification_time_p50_ms: p50,
                classification_time_p95_ms: p95,
                classification_time_p99_ms: p99,
            },
            plans: PlanMetrics {
                executed: self.plans_executed.load(Ordering::Relaxed),
                completed: self.plans_completed.load(Ordering::Relaxed),
                partial: self.plans_partial.load(Ordering::Relaxed),
                failed: self.plans_failed.load(Ordering::Relaxed),
                cancelled: self.plans_cancelled.load(Ordering::Relaxed),
                steps_failed: self.steps_failed.load(Ordering::Relaxed),
                steps_skipped: self.steps_skipped.load(Ordering::Relaxed),
            },
            learning: LearningMetrics {
                corrections_recorded: self.corrections_recorded.load(Ordering::Relaxed),
                successes_recorded: self.successes_recorded.load(Ordering::Relaxed),
                persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub routing: RoutingMetrics,
    pub plans: PlanMetrics,
    pub learning: LearningMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingMetrics {
    pub total_decisions: u64,
    pub decisions_by_source: BTreeMap<String, u64>,
    pub guard_overrides: u64,
    pub clarifications: u64,
    pub self_validation_runs: u64,
    pub self_validation_corrections: u64,
    pub signal_failures: BTreeMap<String, u64>,
    pub avg_classification_time_ms: f64,
    pub classification_time_p50_ms: f64,
    pub classification_time_p95_ms: f64,
    pub classification_time_p99_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanMetrics {
    pub executed: u64,
    pub completed: u64,
    pub partial: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub steps_failed: u64,
    pub steps_skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningMetrics {
    pub corrections_recorded: u64,
    pub successes_recorded: u64,
    pub persistence_failures: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_decision_metrics() {
        let collector = MetricsCollector::new();

        collector.decision_made(DecisionSource::Pattern, Duration::from_millis(20));
        collector.decision_made(DecisionSource::Guard, Duration::from_millis(40));
        collector.clarification_requested();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.routing.total_decisions, 2);
        assert_eq!(snapshot.routing.decisions_by_source["pattern"], 1);
        assert_eq!(snapshot.routing.decisions_by_source["guard"], 1);
        assert_eq!(snapshot.routing.guard_overrides, 1);
        assert_eq!(snapshot.routing.clarifications, 1);
        assert!((snapshot.routing.avg_classification_time_ms - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_signal_and_validation_metrics() {
        let collector = MetricsCollector::new();

        collector.signal_failed(SignalSource::Semantic);
        collector.signal_failed(SignalSource::Semantic);
        collector.self_validation_run(false);
        collector.self_validation_run(true);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.routing.signal_failures["semantic"], 2);
        assert_eq!(snapshot.routing.signal_failures["llm"], 0);
        assert_eq!(snapshot.routing.self_validation_runs, 2);
        assert_eq!(snapshot.routing.self_validation_corrections, 1);
    }

    #[test]
    fn test_plan_outcome_buckets() {
        let collector = MetricsCollector::new();

        collector.plan_finished(2, 0, 0, false);
        collector.plan_finished(1, 1, 0, false);
        collector.plan_finished(0, 1, 1, false);
        collector.plan_finished(1, 0, 0, true);

        let plans = collector.snapshot().plans;
        assert_eq!(plans.executed, 4);
        assert_eq!(plans.completed, 1);
        assert_eq!(plans.partial, 1);
        assert_eq!(plans.failed, 1);
        assert_eq!(plans.cancelled, 1);
        assert_eq!(plans.steps_failed, 2);
        assert_eq!(plans.steps_skipped, 1);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.correction_recorded();
                        collector.decision_made(DecisionSource::Llm, Duration::from_millis(1));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.learning.corrections_recorded, 1000);
        assert_eq!(snapshot.routing.decisions_by_source["llm"], 1000);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..(MAX_LATENCY_SAMPLES + 50) {
            collector.decision_made(DecisionSource::Pattern, Duration::from_millis(i as u64));
        }
        let len = collector.classification_times.lock().unwrap().len();
        assert_eq!(len, MAX_LATENCY_SAMPLES);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert!((percentile(&data, 50.0) - 5.5).abs() < 0.1);
        assert!((percentile(&data, 95.0) - 9.55).abs() < 0.1);
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 100.0), 10.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_reset() {
        let collector = MetricsCollector::new();
        collector.success_recorded();
        collector.plan_finished(1, 0, 0, false);
        collector.reset();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.learning.successes_recorded, 0);
        assert_eq!(snapshot.plans.executed, 0);
        assert_eq!(snapshot.routing.total_decisions, 0);
    }
}
