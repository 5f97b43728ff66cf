//! Metrics collector for the courier scheduler
//!
//! Records through the `metrics` facade; without an installed recorder every
//! call is a no-op.

use metrics::{counter, histogram, Counter, Histogram};

pub struct MetricsCollector {
    tasks_executed_total: Counter,
    tasks_failed_total: Counter,
    task_retries_total: Counter,
    poll_cycle_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_executed_total: counter!("courier_tasks_executed_total"),
            tasks_failed_total: counter!("courier_tasks_failed_total"),
            task_retries_total: counter!("courier_task_retries_total"),
            poll_cycle_duration: histogram!("courier_poll_cycle_duration_seconds"),
        }
    }

    /// Record a finished handler invocation
    pub fn record_task_execution(&self, success: bool) {
        self.tasks_executed_total.increment(1);
        if !success {
            self.tasks_failed_total.increment(1);
        }
    }

    pub fn record_task_retry(&self) {
        self.task_retries_total.increment(1);
    }

    pub fn record_poll_cycle(&self, duration_seconds: f64) {
        self.poll_cycle_duration.record(duration_seconds);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = MetricsCollector::new();
        metrics.record_task_execution(true);
        metrics.record_task_execution(false);
        metrics.record_task_retry();
        metrics.record_poll_cycle(0.25);
    }
}
