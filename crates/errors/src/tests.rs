use crate::*;

#[test]
fn test_error_display() {
    let err = SchedulerError::CourierNotFound { id: 42 };
    assert_eq!(err.to_string(), "信使未找到: 42");

    let err = SchedulerError::DuplicateCourier {
        user_id: "u-1001".to_string(),
    };
    assert_eq!(err.to_string(), "信使已存在: u-1001");

    let err = SchedulerError::LevelMismatch {
        expected: 3,
        actual: 2,
    };
    assert_eq!(err.to_string(), "层级不匹配: 期望 3 级，实际 2 级");

    let err = SchedulerError::ExecutionTimeout { seconds: 30 };
    assert_eq!(err.to_string(), "任务执行超时: 30秒");

    let err = SchedulerError::AlreadyRunning;
    assert_eq!(err.to_string(), "调度器已在运行");
}

#[test]
fn test_error_kind_classification() {
    assert_eq!(
        SchedulerError::invalid_zone("BJ-X").kind(),
        ErrorKind::Validation
    );
    assert_eq!(
        SchedulerError::InvalidLevel("建筑级信使不能创建下级".into()).kind(),
        ErrorKind::Validation
    );
    assert_eq!(
        SchedulerError::permission_denied("越权").kind(),
        ErrorKind::Permission
    );
    assert_eq!(SchedulerError::entry_not_found(7).kind(), ErrorKind::NotFound);
    assert_eq!(
        SchedulerError::HierarchyCycle {
            courier_id: 1,
            target_id: 2
        }
        .kind(),
        ErrorKind::Cycle
    );
    assert_eq!(
        SchedulerError::TaskExecution("boom".into()).kind(),
        ErrorKind::TransientExecution
    );
    assert_eq!(
        SchedulerError::RetriesExhausted {
            entry_id: 1,
            attempts: 3
        }
        .kind(),
        ErrorKind::TerminalExecution
    );
    assert_eq!(SchedulerError::NotRunning.kind(), ErrorKind::Lifecycle);
}

#[test]
fn test_retryable() {
    assert!(SchedulerError::TaskExecution("boom".into()).is_retryable());
    assert!(SchedulerError::ExecutionTimeout { seconds: 5 }.is_retryable());
    assert!(SchedulerError::database_error("connection reset").is_retryable());
    assert!(!SchedulerError::config_error("bad").is_retryable());
    assert!(!SchedulerError::permission_denied("no").is_retryable());
    assert!(!SchedulerError::RetriesExhausted {
        entry_id: 1,
        attempts: 3
    }
    .is_retryable());
}

#[test]
fn test_user_message() {
    assert_eq!(
        SchedulerError::permission_denied("x").user_message(),
        "您没有执行此操作的权限"
    );
    assert_eq!(
        SchedulerError::courier_not_found(1).user_message(),
        "请求的资源不存在"
    );
    assert_eq!(
        SchedulerError::Internal("x".into()).user_message(),
        "系统繁忙，请稍后重试"
    );
}

#[test]
fn test_from_serde_json() {
    let err: SchedulerError = serde_json::from_str::<serde_json::Value>("{bad")
        .unwrap_err()
        .into();
    assert!(matches!(err, SchedulerError::Serialization(_)));
}
