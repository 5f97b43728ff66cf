use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use courier_dispatcher::SchedulerSettings;
use courier_domain::TaskPayload;

/// 固定的测试基准时间
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

/// 1分钟基础退避、2倍增长、最多3次尝试、5秒执行超时
pub fn test_settings() -> SchedulerSettings {
    SchedulerSettings {
        poll_interval: Duration::from_millis(20),
        max_concurrent_tasks: 5,
        max_attempts: 3,
        retry_base: Duration::from_secs(60),
        backoff_multiplier: 2.0,
        poll_batch_size: 100,
        execution_timeout: Duration::from_secs(5),
    }
}

pub fn custom_payload(name: &str) -> TaskPayload {
    TaskPayload::Custom {
        name: name.to_string(),
        body: serde_json::json!({}),
    }
}

pub fn credit_grant_payload(points: i32) -> TaskPayload {
    TaskPayload::CreditGrant {
        user_ids: vec!["user_1".to_string(), "user_2".to_string()],
        points,
        reason: "activity_reward".to_string(),
    }
}

/// 反复检查条件直到成立或超时，返回最后一次的结果
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
