use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_errors::{SchedulerError, SchedulerResult};

use crate::value_objects::{RecurrencePattern, TaskPayload, ZoneCode};

/// 信使层级，数值越大管辖范围越广
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CourierLevel {
    Building = 1,
    Zone = 2,
    School = 3,
    City = 4,
}

impl CourierLevel {
    pub const TOP: CourierLevel = CourierLevel::City;

    pub fn value(self) -> u8 {
        self as u8
    }

    /// 直属下级的层级，楼栋级没有下级
    pub fn below(self) -> Option<CourierLevel> {
        match self {
            CourierLevel::Building => None,
            CourierLevel::Zone => Some(CourierLevel::Building),
            CourierLevel::School => Some(CourierLevel::Zone),
            CourierLevel::City => Some(CourierLevel::School),
        }
    }

    /// 直属上级的层级，城市级没有上级
    pub fn above(self) -> Option<CourierLevel> {
        match self {
            CourierLevel::Building => Some(CourierLevel::Zone),
            CourierLevel::Zone => Some(CourierLevel::School),
            CourierLevel::School => Some(CourierLevel::City),
            CourierLevel::City => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CourierLevel::Building => "楼栋",
            CourierLevel::Zone => "片区",
            CourierLevel::School => "学校",
            CourierLevel::City => "城市",
        }
    }
}

impl TryFrom<u8> for CourierLevel {
    type Error = SchedulerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CourierLevel::Building),
            2 => Ok(CourierLevel::Zone),
            3 => Ok(CourierLevel::School),
            4 => Ok(CourierLevel::City),
            _ => Err(SchedulerError::InvalidLevel(format!(
                "信使层级必须在1-4之间，实际为 {value}"
            ))),
        }
    }
}

impl From<CourierLevel> for u8 {
    fn from(level: CourierLevel) -> Self {
        level.value()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourierStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "SUSPENDED")]
    Suspended,
    #[serde(rename = "INACTIVE")]
    Inactive,
}

impl CourierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierStatus::Active => "ACTIVE",
            CourierStatus::Suspended => "SUSPENDED",
            CourierStatus::Inactive => "INACTIVE",
        }
    }
}

impl std::str::FromStr for CourierStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(CourierStatus::Active),
            "SUSPENDED" => Ok(CourierStatus::Suspended),
            "INACTIVE" => Ok(CourierStatus::Inactive),
            _ => Err(SchedulerError::invalid_request(format!(
                "无效的信使状态: {s}"
            ))),
        }
    }
}

/// 信使。`parent_id` 只保存上级ID，不持有上级对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Courier {
    pub id: i64,
    pub user_id: String,
    pub level: CourierLevel,
    pub parent_id: Option<i64>,
    pub zone_code: ZoneCode,
    pub status: CourierStatus,
    /// 管辖范围（学校/城市编码）
    pub jurisdiction: String,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn is_active(&self) -> bool {
        matches!(self.status, CourierStatus::Active)
    }

    pub fn is_root(&self) -> bool {
        self.level == CourierLevel::TOP
    }

    /// 检查本信使与上级之间的层级和区域不变量
    pub fn check_parent(&self, parent: &Courier) -> SchedulerResult<()> {
        let expected = self.level.above().ok_or_else(|| {
            SchedulerError::HierarchyCorrupted(format!("城市级信使 {} 不应存在上级", self.id))
        })?;
        if parent.level != expected {
            return Err(SchedulerError::LevelMismatch {
                expected: expected.value(),
                actual: parent.level.value(),
            });
        }
        if !parent.zone_code.contains(&self.zone_code) {
            return Err(SchedulerError::invalid_zone(format!(
                "区域 {} 不在上级区域 {} 范围内",
                self.zone_code, parent.zone_code
            )));
        }
        Ok(())
    }
}

/// 活动，由外部协作方维护，本模块只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub name: String,
    pub recurrence: Option<RecurrencePattern>,
    pub interval: u32,
    pub end_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0, // 将由存储层生成
            name: name.into(),
            recurrence: None,
            interval: 1,
            end_at: None,
            created_at: now,
        }
    }

    pub fn with_recurrence(mut self, pattern: RecurrencePattern, interval: u32) -> Self {
        self.recurrence = Some(pattern);
        self.interval = interval;
        self
    }

    pub fn with_end_at(mut self, end_at: DateTime<Utc>) -> Self {
        self.end_at = Some(end_at);
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::invalid_request("活动名称不能为空"));
        }
        if self.interval == 0 {
            return Err(SchedulerError::invalid_request("重复间隔必须大于0"));
        }
        if let Some(end_at) = self.end_at {
            if end_at <= self.created_at {
                return Err(SchedulerError::invalid_request(
                    "活动结束时间必须晚于创建时间",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScheduleStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "EXECUTING")]
    Executing,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl ScheduleStatus {
    pub const ALL: [ScheduleStatus; 5] = [
        ScheduleStatus::Pending,
        ScheduleStatus::Executing,
        ScheduleStatus::Completed,
        ScheduleStatus::Failed,
        ScheduleStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "PENDING",
            ScheduleStatus::Executing => "EXECUTING",
            ScheduleStatus::Completed => "COMPLETED",
            ScheduleStatus::Failed => "FAILED",
            ScheduleStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(ScheduleStatus::Pending),
            "EXECUTING" => Ok(ScheduleStatus::Executing),
            "COMPLETED" => Ok(ScheduleStatus::Completed),
            "FAILED" => Ok(ScheduleStatus::Failed),
            "CANCELLED" => Ok(ScheduleStatus::Cancelled),
            _ => Err(SchedulerError::invalid_request(format!(
                "无效的调度状态: {s}"
            ))),
        }
    }
}

/// 调度条目：活动的一次具体执行实例，自带重试状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: i64,
    pub activity_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub payload: TaskPayload,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleEntry {
    pub fn new(
        activity_id: i64,
        scheduled_at: DateTime<Utc>,
        payload: TaskPayload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0, // 将由存储层生成
            activity_id,
            scheduled_at,
            status: ScheduleStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            payload,
            result: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 下一次可被拾取的时间；终态条目没有
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            ScheduleStatus::Pending => Some(self.scheduled_at),
            ScheduleStatus::Failed => self.next_retry_at,
            _ => None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at().is_some_and(|due| due <= now)
    }

    pub fn is_retryable_failure(&self) -> bool {
        self.status == ScheduleStatus::Failed && self.next_retry_at.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        match self.status {
            ScheduleStatus::Completed | ScheduleStatus::Cancelled => true,
            ScheduleStatus::Failed => self.next_retry_at.is_none(),
            _ => false,
        }
    }

    pub fn can_cancel(&self) -> bool {
        self.status == ScheduleStatus::Pending || self.is_retryable_failure()
    }

    pub fn mark_executing(&mut self, now: DateTime<Utc>) -> SchedulerResult<()> {
        if !(self.status == ScheduleStatus::Pending || self.is_retryable_failure()) {
            return Err(self.transition_error("execute"));
        }
        self.status = ScheduleStatus::Executing;
        self.started_at = Some(now);
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>, result: Option<String>) {
        self.status = ScheduleStatus::Completed;
        self.retry_count = 0;
        self.next_retry_at = None;
        self.result = result;
        self.error_message = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// `next_retry_at` 为 `None` 表示终态失败
    pub fn mark_failed(
        &mut self,
        now: DateTime<Utc>,
        error: String,
        next_retry_at: Option<DateTime<Utc>>,
    ) {
        self.status = ScheduleStatus::Failed;
        self.error_message = Some(error);
        self.next_retry_at = next_retry_at;
        if next_retry_at.is_none() {
            self.completed_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> SchedulerResult<()> {
        if !self.can_cancel() {
            return Err(self.transition_error("cancel"));
        }
        self.status = ScheduleStatus::Cancelled;
        self.next_retry_at = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_milliseconds()),
            _ => None,
        }
    }

    fn transition_error(&self, action: &str) -> SchedulerError {
        let from = if self.status == ScheduleStatus::Failed && self.next_retry_at.is_none() {
            "FAILED(terminal)".to_string()
        } else {
            self.status.to_string()
        };
        SchedulerError::InvalidStateTransition {
            entry_id: self.id,
            from,
            action: action.to_string(),
        }
    }
}

/// 各状态的条目数量
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: ScheduleStatus) {
        self.add(status, 1);
    }

    pub fn add(&mut self, status: ScheduleStatus, count: usize) {
        match status {
            ScheduleStatus::Pending => self.pending += count,
            ScheduleStatus::Executing => self.executing += count,
            ScheduleStatus::Completed => self.completed += count,
            ScheduleStatus::Failed => self.failed += count,
            ScheduleStatus::Cancelled => self.cancelled += count,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.executing + self.completed + self.failed + self.cancelled
    }

    pub fn active(&self) -> usize {
        self.pending + self.executing
    }

    /// 已完成与已取消的条目数。FAILED 只按状态计数，无法区分可重试失败和终态失败，
    /// 因此不计入；终态失败的数量需要查询条目本身
    pub fn finished(&self) -> usize {
        self.completed + self.cancelled
    }
}
