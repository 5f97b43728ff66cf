//! 内置任务处理器
//!
//! 积分和提醒的真正业务由外部服务完成，这里只记录结构化日志，
//! 作为独立运行时的默认实现。自定义任务需要调用方自行注册。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use courier_dispatcher::{TaskHandler, TaskHandlerRegistry};
use courier_domain::{SchedulerError, SchedulerResult, TaskPayload, TaskType};

fn unexpected_payload(handler: &str, payload: &TaskPayload) -> SchedulerError {
    SchedulerError::InvalidPayload(format!(
        "处理器 {handler} 收到不匹配的任务类型 {}",
        payload.task_type()
    ))
}

pub struct CreditGrantHandler;

#[async_trait]
impl TaskHandler for CreditGrantHandler {
    fn name(&self) -> &str {
        "credit_grant"
    }

    async fn handle(&self, payload: &TaskPayload) -> SchedulerResult<Option<String>> {
        let TaskPayload::CreditGrant {
            user_ids,
            points,
            reason,
        } = payload
        else {
            return Err(unexpected_payload(self.name(), payload));
        };

        info!(
            event = "credit_grant",
            credit.users = user_ids.len(),
            credit.points = *points,
            credit.reason = %reason,
            "发放积分"
        );
        Ok(Some(format!(
            "已为 {} 名用户各发放 {} 积分",
            user_ids.len(),
            points
        )))
    }
}

pub struct CreditExpiryHandler;

#[async_trait]
impl TaskHandler for CreditExpiryHandler {
    fn name(&self) -> &str {
        "credit_expiry"
    }

    async fn handle(&self, payload: &TaskPayload) -> SchedulerResult<Option<String>> {
        let TaskPayload::CreditExpiry { before } = payload else {
            return Err(unexpected_payload(self.name(), payload));
        };

        info!(event = "credit_expiry", credit.before = %before, "清理过期积分");
        Ok(Some(format!("已清理 {before} 之前的过期积分")))
    }
}

pub struct ActivityReminderHandler;

#[async_trait]
impl TaskHandler for ActivityReminderHandler {
    fn name(&self) -> &str {
        "activity_reminder"
    }

    async fn handle(&self, payload: &TaskPayload) -> SchedulerResult<Option<String>> {
        let TaskPayload::ActivityReminder { channel, message } = payload else {
            return Err(unexpected_payload(self.name(), payload));
        };

        info!(
            event = "activity_reminder",
            reminder.channel = %channel,
            reminder.message = %message,
            "发送活动提醒"
        );
        Ok(Some(format!("已通过 {channel} 发送提醒")))
    }
}

/// 注册积分发放、积分过期和活动提醒三个内置处理器
pub async fn register_builtin_handlers(registry: &TaskHandlerRegistry) {
    registry
        .register(TaskType::CreditGrant, Arc::new(CreditGrantHandler))
        .await;
    registry
        .register(TaskType::CreditExpiry, Arc::new(CreditExpiryHandler))
        .await;
    registry
        .register(TaskType::ActivityReminder, Arc::new(ActivityReminderHandler))
        .await;
}
