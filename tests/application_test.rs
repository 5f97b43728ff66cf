use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use courier_config::AppConfig;
use courier_domain::{
    Activity, CourierLevel, CreateSubordinateRequest, RecurrencePattern, RegisterRootRequest,
    ScheduleStatus, SchedulerError, TaskType,
};
use courier_scheduler::{Application, ShutdownManager};
use courier_testing_utils::{credit_grant_payload, custom_payload, wait_until, FailingHandler};

fn memory_config() -> Result<AppConfig> {
    AppConfig::from_toml_str(
        r#"
        [database]
        backend = "memory"

        [scheduler]
        poll_interval_seconds = 1
        "#,
    )
}

#[tokio::test]
async fn test_application_runs_scheduled_work_until_shutdown() -> Result<()> {
    let app = Arc::new(Application::new(memory_config()?).await?);
    let scheduler = app.scheduler();

    let types = scheduler.registry().registered_task_types().await;
    assert!(types.contains(&TaskType::CreditGrant));
    assert!(!types.contains(&TaskType::Custom));

    let activity = scheduler
        .register_activity(
            Activity::new("每日签到奖励", Utc::now())
                .with_recurrence(RecurrencePattern::Daily, 1),
        )
        .await?;
    let due = Utc::now() - chrono::Duration::seconds(1);
    let granted = scheduler
        .schedule_activity(activity.id, due, credit_grant_payload(10))
        .await?;
    // 自定义任务默认不可调度，注册一个总是失败的处理器后执行会进入重试
    let err = scheduler
        .schedule_activity(activity.id, due, custom_payload("unregistered"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::HandlerNotFound { .. }));
    scheduler
        .registry()
        .register(TaskType::Custom, Arc::new(FailingHandler::always()))
        .await;
    let custom = scheduler
        .schedule_activity(activity.id, due, custom_payload("always-failing"))
        .await?;

    let shutdown_manager = ShutdownManager::new();
    let handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    let done = wait_until(Duration::from_secs(5), || {
        let scheduler = scheduler.clone();
        async move {
            let completed = scheduler
                .get_scheduled_tasks(Some(ScheduleStatus::Completed), 10)
                .await
                .unwrap_or_default();
            let failed = scheduler
                .get_scheduled_tasks(Some(ScheduleStatus::Failed), 10)
                .await
                .unwrap_or_default();
            !completed.is_empty() && !failed.is_empty()
        }
    })
    .await;
    assert!(done, "scheduled entries were not processed in time");
    assert!(scheduler.is_running().await);

    let completed = scheduler
        .get_scheduled_tasks(Some(ScheduleStatus::Completed), 10)
        .await?;
    assert_eq!(completed[0].id, granted.id);

    let failed = scheduler
        .get_scheduled_tasks(Some(ScheduleStatus::Failed), 10)
        .await?;
    assert_eq!(failed[0].id, custom.id);
    assert_eq!(failed[0].retry_count, 1);
    assert!(failed[0].next_retry_at.is_some());

    // 每日活动成功后续排到明天
    let pending = scheduler
        .get_scheduled_tasks(Some(ScheduleStatus::Pending), 10)
        .await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].scheduled_at, due + chrono::Duration::days(1));

    shutdown_manager.shutdown().await;
    let joined = tokio::time::timeout(Duration::from_secs(5), handle).await?;
    joined??;
    assert!(!scheduler.is_running().await);

    Ok(())
}

#[tokio::test]
async fn test_application_wires_hierarchy() -> Result<()> {
    let app = Application::new(memory_config()?).await?;
    let hierarchy = app.hierarchy();

    let root = hierarchy
        .register_root(RegisterRootRequest {
            user_id: "city_sh".to_string(),
            zone_code: "SH".to_string(),
            jurisdiction: "SH".to_string(),
        })
        .await?;
    let school = hierarchy
        .create_subordinate(
            root.id,
            CreateSubordinateRequest::new("school_fdu").with_zone("SH-FDU"),
        )
        .await?;

    assert_eq!(school.level, CourierLevel::School);
    let chain = hierarchy.get_hierarchy(school.id).await?;
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].id, root.id);

    Ok(())
}

#[tokio::test]
async fn test_application_with_sqlite_file_and_scheduler_disabled() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("courier.db");
    let toml = format!(
        r#"
        [database]
        backend = "sqlite"
        url = "sqlite://{}"

        [scheduler]
        enabled = false
        "#,
        db_path.display()
    );
    let config = AppConfig::from_toml_str(&toml)?;
    let app = Application::new(config).await?;

    let scheduler = app.scheduler();
    let activity = scheduler
        .register_activity(Activity::new("月度积分清理", Utc::now()))
        .await?;
    let entry = scheduler
        .schedule_activity(
            activity.id,
            Utc::now() + chrono::Duration::hours(1),
            credit_grant_payload(5),
        )
        .await?;

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    shutdown_manager.shutdown().await;
    app.run(shutdown_rx).await?;
    assert!(!scheduler.is_running().await);

    // 数据已落盘，重新打开后仍可读取
    let reopened = Application::new(AppConfig::from_toml_str(&toml)?).await?;
    let entries = reopened.scheduler().get_scheduled_tasks(None, 10).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, entry.id);
    assert_eq!(entries[0].status, ScheduleStatus::Pending);

    Ok(())
}
