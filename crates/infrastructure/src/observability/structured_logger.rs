//! Structured logging utilities
//!
//! Every helper emits a single `tracing` event carrying an `event = "..."`
//! field so log pipelines can filter on it.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log schedule entry creation
    pub fn log_entry_scheduled(
        entry_id: i64,
        activity_id: i64,
        task_type: &str,
        scheduled_at: DateTime<Utc>,
    ) {
        info!(
            event = "entry_scheduled",
            entry.id = entry_id,
            activity.id = activity_id,
            task.type = task_type,
            entry.scheduled_at = %scheduled_at,
            "Schedule entry created"
        );
    }

    /// Log task execution start
    pub fn log_execution_start(entry_id: i64, activity_id: i64, task_type: &str, attempt: u32) {
        info!(
            event = "task_execution_start",
            entry.id = entry_id,
            activity.id = activity_id,
            task.type = task_type,
            task.attempt = attempt,
            "Task execution started"
        );
    }

    /// Log task execution completion
    pub fn log_execution_complete(
        entry_id: i64,
        task_type: &str,
        success: bool,
        duration_ms: u64,
        error_message: Option<&str>,
    ) {
        if success {
            info!(
                event = "task_execution_complete",
                entry.id = entry_id,
                task.type = task_type,
                task.success = success,
                task.duration_ms = duration_ms,
                "Task execution completed successfully"
            );
        } else {
            error!(
                event = "task_execution_failed",
                entry.id = entry_id,
                task.type = task_type,
                task.success = success,
                task.duration_ms = duration_ms,
                task.error = error_message.unwrap_or("Unknown error"),
                "Task execution failed"
            );
        }
    }

    /// Log a retry being scheduled after a failure
    pub fn log_retry_scheduled(
        entry_id: i64,
        retry_count: u32,
        max_attempts: u32,
        next_retry_at: DateTime<Utc>,
    ) {
        warn!(
            event = "task_retry_scheduled",
            entry.id = entry_id,
            task.retry_count = retry_count,
            task.max_attempts = max_attempts,
            task.next_retry_at = %next_retry_at,
            "Task retry scheduled"
        );
    }

    /// Log a mutation of the courier hierarchy
    pub fn log_hierarchy_change(action: &str, courier_id: i64, manager_id: i64, detail: &str) {
        info!(
            event = "hierarchy_change",
            hierarchy.action = action,
            courier.id = courier_id,
            manager.id = manager_id,
            hierarchy.detail = detail,
            "Courier hierarchy changed"
        );
    }

    /// Log system error
    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            error.component = component,
            error.operation = operation,
            error.message = %error,
            "System error occurred"
        );
    }
}
