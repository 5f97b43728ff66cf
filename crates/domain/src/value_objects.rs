use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_errors::{SchedulerError, SchedulerResult};

/// 层级区域编码，例如 `BJ`、`BJ-PKU`、`BJ-PKU-EAST`、`BJ-PKU-EAST-B12`
///
/// 由 `-` 分隔的若干段组成，每段只允许字母、数字和下划线。
/// 包含关系按段比较：`BJ` 包含 `BJ-PKU`，但不包含 `BJX`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ZoneCode(String);

impl ZoneCode {
    pub const SEPARATOR: char = '-';

    pub fn parse(code: &str) -> SchedulerResult<Self> {
        let code = code.trim();
        if code.is_empty() {
            return Err(SchedulerError::invalid_zone("区域编码不能为空"));
        }
        for segment in code.split(Self::SEPARATOR) {
            if segment.is_empty() {
                return Err(SchedulerError::invalid_zone(format!(
                    "区域编码包含空段: {code}"
                )));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(SchedulerError::invalid_zone(format!(
                    "区域编码包含非法字符: {code}"
                )));
            }
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `other` 是否位于本区域范围内（含相等）
    pub fn contains(&self, other: &ZoneCode) -> bool {
        match other.0.strip_prefix(self.0.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with(Self::SEPARATOR),
            None => false,
        }
    }

    pub fn depth(&self) -> usize {
        self.0.split(Self::SEPARATOR).count()
    }
}

impl fmt::Display for ZoneCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ZoneCode {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ZoneCode {
    type Error = SchedulerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ZoneCode> for String {
    fn from(zone: ZoneCode) -> Self {
        zone.0
    }
}

/// 重复周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrencePattern {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrencePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePattern::Minutely => "minutely",
            RecurrencePattern::Hourly => "hourly",
            RecurrencePattern::Daily => "daily",
            RecurrencePattern::Weekly => "weekly",
            RecurrencePattern::Monthly => "monthly",
            RecurrencePattern::Yearly => "yearly",
        }
    }
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecurrencePattern {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minutely" => Ok(RecurrencePattern::Minutely),
            "hourly" => Ok(RecurrencePattern::Hourly),
            "daily" => Ok(RecurrencePattern::Daily),
            "weekly" => Ok(RecurrencePattern::Weekly),
            "monthly" => Ok(RecurrencePattern::Monthly),
            "yearly" => Ok(RecurrencePattern::Yearly),
            _ => Err(SchedulerError::invalid_request(format!(
                "无效的重复周期: {s}"
            ))),
        }
    }
}

/// 任务类型，决定由哪个处理器执行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CreditGrant,
    CreditExpiry,
    ActivityReminder,
    Custom,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CreditGrant => "credit_grant",
            TaskType::CreditExpiry => "credit_expiry",
            TaskType::ActivityReminder => "activity_reminder",
            TaskType::Custom => "custom",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit_grant" => Ok(TaskType::CreditGrant),
            "credit_expiry" => Ok(TaskType::CreditExpiry),
            "activity_reminder" => Ok(TaskType::ActivityReminder),
            "custom" => Ok(TaskType::Custom),
            _ => Err(SchedulerError::InvalidPayload(format!("未知的任务类型: {s}"))),
        }
    }
}

/// 任务执行载荷，每种任务类型携带各自的强类型数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TaskPayload {
    /// 向一批用户发放积分
    CreditGrant {
        user_ids: Vec<String>,
        points: i32,
        reason: String,
    },
    /// 清理指定时间之前的过期积分
    CreditExpiry { before: DateTime<Utc> },
    /// 活动提醒
    ActivityReminder { channel: String, message: String },
    Custom {
        name: String,
        #[serde(default)]
        body: serde_json::Value,
    },
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::CreditGrant { .. } => TaskType::CreditGrant,
            TaskPayload::CreditExpiry { .. } => TaskType::CreditExpiry,
            TaskPayload::ActivityReminder { .. } => TaskType::ActivityReminder,
            TaskPayload::Custom { .. } => TaskType::Custom,
        }
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        match self {
            TaskPayload::CreditGrant {
                user_ids,
                points,
                reason,
            } => {
                if user_ids.is_empty() {
                    return Err(SchedulerError::InvalidPayload(
                        "积分发放的用户列表不能为空".to_string(),
                    ));
                }
                if user_ids.iter().any(|id| id.trim().is_empty()) {
                    return Err(SchedulerError::InvalidPayload(
                        "积分发放的用户ID不能为空".to_string(),
                    ));
                }
                if *points <= 0 {
                    return Err(SchedulerError::InvalidPayload(format!(
                        "发放积分必须大于0，实际为 {points}"
                    )));
                }
                if reason.trim().is_empty() {
                    return Err(SchedulerError::InvalidPayload(
                        "积分发放原因不能为空".to_string(),
                    ));
                }
            }
            TaskPayload::CreditExpiry { .. } => {}
            TaskPayload::ActivityReminder { channel, message } => {
                if channel.trim().is_empty() || message.trim().is_empty() {
                    return Err(SchedulerError::InvalidPayload(
                        "提醒的渠道和内容不能为空".to_string(),
                    ));
                }
            }
            TaskPayload::Custom { name, .. } => {
                if name.trim().is_empty() {
                    return Err(SchedulerError::InvalidPayload(
                        "自定义任务名称不能为空".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
