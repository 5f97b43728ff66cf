use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("信使未找到: {id}")]
    CourierNotFound { id: i64 },
    #[error("活动未找到: {id}")]
    ActivityNotFound { id: i64 },
    #[error("调度条目未找到: {id}")]
    ScheduleEntryNotFound { id: i64 },
    #[error("任务类型 {task_type} 未注册处理器")]
    HandlerNotFound { task_type: String },

    #[error("无效的信使层级: {0}")]
    InvalidLevel(String),
    #[error("无效的区域编码: {0}")]
    InvalidZone(String),
    #[error("信使已存在: {user_id}")]
    DuplicateCourier { user_id: String },
    #[error("无效的请求: {0}")]
    InvalidRequest(String),
    #[error("无效的任务载荷: {0}")]
    InvalidPayload(String),

    #[error("权限不足: {0}")]
    PermissionDenied(String),

    #[error("检测到层级循环: 信使 {courier_id} 是 {target_id} 的上级")]
    HierarchyCycle { courier_id: i64, target_id: i64 },
    #[error("层级不匹配: 期望 {expected} 级，实际 {actual} 级")]
    LevelMismatch { expected: u8, actual: u8 },
    #[error("层级数据损坏: {0}")]
    HierarchyCorrupted(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("任务执行超时: {seconds}秒")]
    ExecutionTimeout { seconds: u64 },
    #[error("重试次数已用尽: 条目 {entry_id} 共尝试 {attempts} 次")]
    RetriesExhausted { entry_id: i64, attempts: u32 },

    #[error("调度器已在运行")]
    AlreadyRunning,
    #[error("调度器未运行")]
    NotRunning,
    #[error("无效的状态转换: 条目 {entry_id} 当前状态 {from}，无法执行 {action}")]
    InvalidStateTransition {
        entry_id: i64,
        from: String,
        action: String,
    },

    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// 错误分类，供外层（API等）转换为用户可见的响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Permission,
    NotFound,
    Cycle,
    TransientExecution,
    TerminalExecution,
    Lifecycle,
    Infrastructure,
}

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn courier_not_found(id: i64) -> Self {
        Self::CourierNotFound { id }
    }
    pub fn activity_not_found(id: i64) -> Self {
        Self::ActivityNotFound { id }
    }
    pub fn entry_not_found(id: i64) -> Self {
        Self::ScheduleEntryNotFound { id }
    }
    pub fn invalid_zone<S: Into<String>>(msg: S) -> Self {
        Self::InvalidZone(msg.into())
    }
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRequest(msg.into())
    }
    pub fn permission_denied<S: Into<String>>(msg: S) -> Self {
        Self::PermissionDenied(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        use SchedulerError::*;
        match self {
            InvalidLevel(_)
            | InvalidZone(_)
            | DuplicateCourier { .. }
            | InvalidRequest(_)
            | InvalidPayload(_) => ErrorKind::Validation,
            PermissionDenied(_) => ErrorKind::Permission,
            CourierNotFound { .. }
            | ActivityNotFound { .. }
            | ScheduleEntryNotFound { .. }
            | HandlerNotFound { .. } => ErrorKind::NotFound,
            HierarchyCycle { .. } | LevelMismatch { .. } | HierarchyCorrupted(_) => {
                ErrorKind::Cycle
            }
            TaskExecution(_) | ExecutionTimeout { .. } => ErrorKind::TransientExecution,
            RetriesExhausted { .. } => ErrorKind::TerminalExecution,
            AlreadyRunning | NotRunning | InvalidStateTransition { .. } => ErrorKind::Lifecycle,
            Database(_) | DatabaseOperation(_) | Serialization(_) | Configuration(_)
            | Internal(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientExecution | ErrorKind::Infrastructure
        ) && !matches!(self, SchedulerError::Configuration(_))
    }

    pub fn user_message(&self) -> &str {
        match self.kind() {
            ErrorKind::Validation => "输入数据验证失败",
            ErrorKind::Permission => "您没有执行此操作的权限",
            ErrorKind::NotFound => "请求的资源不存在",
            ErrorKind::Cycle => "该操作会破坏信使层级结构",
            ErrorKind::Lifecycle => "当前状态不允许该操作",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
