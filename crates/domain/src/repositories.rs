//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则。
//! 所有实现在单进程内必须保证读己之写。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use courier_errors::SchedulerResult;

use crate::entities::{Activity, Courier, ScheduleEntry, ScheduleStatus, StatusCounts};

/// 信使仓储抽象
#[async_trait]
pub trait CourierRepository: Send + Sync {
    /// 持久化新信使并返回带ID的实例；`user_id` 重复时返回 `DuplicateCourier`
    async fn create(&self, courier: &Courier) -> SchedulerResult<Courier>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Courier>>;
    async fn get_by_user_id(&self, user_id: &str) -> SchedulerResult<Option<Courier>>;
    /// 直属下级，按ID升序
    async fn get_children(&self, parent_id: i64) -> SchedulerResult<Vec<Courier>>;
    async fn update(&self, courier: &Courier) -> SchedulerResult<()>;
}

/// 活动仓储抽象
#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn create(&self, activity: &Activity) -> SchedulerResult<Activity>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Activity>>;
}

/// 调度条目仓储抽象
#[async_trait]
pub trait ScheduleEntryRepository: Send + Sync {
    async fn create(&self, entry: &ScheduleEntry) -> SchedulerResult<ScheduleEntry>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduleEntry>>;
    async fn update(&self, entry: &ScheduleEntry) -> SchedulerResult<()>;

    /// 在同一个原子写入中保存已完成的条目并插入后续条目（如有），返回插入后的后续条目。
    /// 任一步失败时两者都不生效。
    async fn complete_with_next(
        &self,
        completed: &ScheduleEntry,
        next: Option<&ScheduleEntry>,
    ) -> SchedulerResult<Option<ScheduleEntry>>;

    /// 仅当存储中的状态仍为 `expected` 时写入 `entry`，返回是否写入成功。
    /// `expected` 为 FAILED 时只匹配可重试失败（`next_retry_at` 非空）。
    /// 用于拾取和取消，保证同一条目同时只有一个执行者。
    async fn update_if_status(
        &self,
        entry: &ScheduleEntry,
        expected: ScheduleStatus,
    ) -> SchedulerResult<bool>;

    /// 到期条目：PENDING 且 scheduled_at <= now，或 FAILED 且 next_retry_at <= now。
    /// 按到期时间升序，最多 `limit` 条。
    async fn get_due_entries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>>;

    /// EXECUTING 且 started_at <= started_before 的条目，按 started_at 升序，最多 `limit` 条
    async fn get_stale_executing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>>;

    /// 按状态过滤（`None` 表示全部），按 scheduled_at 升序，最多 `limit` 条
    async fn list(
        &self,
        status: Option<ScheduleStatus>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>>;

    async fn count_by_status(&self) -> SchedulerResult<StatusCounts>;
}
