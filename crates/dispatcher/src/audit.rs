//! 执行结果审计
//!
//! 每次处理器调用结束后调度器都会向 `AuditSink` 推送一条 `ExecutionOutcome`，
//! 通知投递等下游逻辑挂在这里。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use courier_domain::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Succeeded,
    /// 失败，已安排重试
    RetryScheduled,
    /// 失败且重试次数用尽
    Exhausted,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Succeeded => "succeeded",
            OutcomeKind::RetryScheduled => "retry_scheduled",
            OutcomeKind::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub entry_id: i64,
    pub activity_id: i64,
    pub task_type: TaskType,
    pub kind: OutcomeKind,
    /// 成功时为处理器结果，失败时为错误信息
    pub message: Option<String>,
    pub retry_count: u32,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, outcome: &ExecutionOutcome);
}

/// 默认实现：写一条结构化日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, outcome: &ExecutionOutcome) {
        match outcome.kind {
            OutcomeKind::Succeeded => info!(
                event = "execution_audit",
                entry.id = outcome.entry_id,
                activity.id = outcome.activity_id,
                task.type = outcome.task_type.as_str(),
                outcome = outcome.kind.as_str(),
                result = outcome.message.as_deref().unwrap_or(""),
                "调度条目执行成功"
            ),
            OutcomeKind::RetryScheduled | OutcomeKind::Exhausted => warn!(
                event = "execution_audit",
                entry.id = outcome.entry_id,
                activity.id = outcome.activity_id,
                task.type = outcome.task_type.as_str(),
                outcome = outcome.kind.as_str(),
                retry_count = outcome.retry_count,
                error = outcome.message.as_deref().unwrap_or(""),
                "调度条目执行失败"
            ),
        }
    }
}
