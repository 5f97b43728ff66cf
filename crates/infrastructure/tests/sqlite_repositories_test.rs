use chrono::{Duration, TimeZone, Utc};
use courier_config::DatabaseConfig;
use courier_domain::{
    Activity, ActivityRepository, Courier, CourierLevel, CourierRepository, CourierStatus,
    RecurrencePattern, ScheduleEntry, ScheduleEntryRepository, ScheduleStatus, SchedulerError,
    TaskPayload, ZoneCode,
};
use courier_infrastructure::{
    DatabaseManager, SqliteActivityRepository, SqliteCourierRepository,
    SqliteScheduleEntryRepository,
};

async fn setup_manager(url: String) -> DatabaseManager {
    let config = DatabaseConfig {
        url,
        ..Default::default()
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    manager.migrate().await.unwrap();
    manager
}

fn city_courier(user_id: &str, zone: &str) -> Courier {
    let now = Utc::now();
    Courier {
        id: 0,
        user_id: user_id.to_string(),
        level: CourierLevel::City,
        parent_id: None,
        zone_code: ZoneCode::parse(zone).unwrap(),
        status: CourierStatus::Active,
        jurisdiction: zone.to_string(),
        created_by: None,
        created_at: now,
        updated_at: now,
    }
}

fn grant_payload() -> TaskPayload {
    TaskPayload::CreditGrant {
        user_ids: vec!["u1".to_string(), "u2".to_string()],
        points: 5,
        reason: "每周活跃奖励".to_string(),
    }
}

#[tokio::test]
async fn test_courier_repository_round_trip() {
    let manager = setup_manager("sqlite::memory:".to_string()).await;
    let repo = SqliteCourierRepository::new(manager.pool().clone());

    let root = repo.create(&city_courier("city-1", "BJ")).await.unwrap();
    assert!(root.id > 0);

    let mut school = city_courier("school-1", "BJ-PKU");
    school.level = CourierLevel::School;
    school.parent_id = Some(root.id);
    school.created_by = Some(root.id);
    let school = repo.create(&school).await.unwrap();

    let loaded = repo.get_by_id(school.id).await.unwrap().unwrap();
    assert_eq!(loaded.level, CourierLevel::School);
    assert_eq!(loaded.parent_id, Some(root.id));
    assert_eq!(loaded.zone_code.as_str(), "BJ-PKU");
    assert_eq!(loaded.status, CourierStatus::Active);

    let by_user = repo.get_by_user_id("city-1").await.unwrap().unwrap();
    assert_eq!(by_user.id, root.id);
    assert!(repo.get_by_user_id("nobody").await.unwrap().is_none());

    let children = repo.get_children(root.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, school.id);

    let mut updated = loaded.clone();
    updated.zone_code = ZoneCode::parse("BJ-PKU-EAST").unwrap();
    repo.update(&updated).await.unwrap();
    let reloaded = repo.get_by_id(school.id).await.unwrap().unwrap();
    assert_eq!(reloaded.zone_code.as_str(), "BJ-PKU-EAST");

    let err = repo.create(&city_courier("city-1", "SH")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateCourier { .. }));

    let mut missing = reloaded;
    missing.id = 9999;
    assert!(matches!(
        repo.update(&missing).await.unwrap_err(),
        SchedulerError::CourierNotFound { id: 9999 }
    ));
}

#[tokio::test]
async fn test_activity_repository_round_trip() {
    let manager = setup_manager("sqlite::memory:".to_string()).await;
    let repo = SqliteActivityRepository::new(manager.pool().clone());

    let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
    let activity = Activity::new("每日签到", created_at)
        .with_recurrence(RecurrencePattern::Weekly, 2)
        .with_end_at(created_at + Duration::days(90));
    let created = repo.create(&activity).await.unwrap();

    let loaded = repo.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.recurrence, Some(RecurrencePattern::Weekly));
    assert_eq!(loaded.interval, 2);
    assert_eq!(loaded.end_at, Some(created_at + Duration::days(90)));
    assert!(repo.get_by_id(created.id + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_schedule_entry_repository_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("courier.db").display());
    let manager = setup_manager(url).await;
    manager.health_check().await.unwrap();

    let activities = SqliteActivityRepository::new(manager.pool().clone());
    let entries = SqliteScheduleEntryRepository::new(manager.pool().clone());

    let now = Utc::now();
    let activity = activities
        .create(&Activity::new("积分发放", now))
        .await
        .unwrap();

    let due_later = entries
        .create(&ScheduleEntry::new(
            activity.id,
            now - Duration::minutes(1),
            grant_payload(),
            now,
        ))
        .await
        .unwrap();
    let due_first = entries
        .create(&ScheduleEntry::new(
            activity.id,
            now - Duration::minutes(30),
            grant_payload(),
            now,
        ))
        .await
        .unwrap();
    entries
        .create(&ScheduleEntry::new(
            activity.id,
            now + Duration::hours(1),
            grant_payload(),
            now,
        ))
        .await
        .unwrap();

    let loaded = entries.get_by_id(due_first.id).await.unwrap().unwrap();
    assert_eq!(loaded.payload, grant_payload());
    assert_eq!(loaded.status, ScheduleStatus::Pending);

    let due = entries.get_due_entries(now, 10).await.unwrap();
    let ids: Vec<i64> = due.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![due_first.id, due_later.id]);

    // 第一次拾取成功，第二次因状态已变化而失败
    let mut claim = loaded.clone();
    claim.mark_executing(now).unwrap();
    assert!(entries
        .update_if_status(&claim, ScheduleStatus::Pending)
        .await
        .unwrap());
    assert!(!entries
        .update_if_status(&claim, ScheduleStatus::Pending)
        .await
        .unwrap());

    claim.retry_count = 1;
    claim.mark_failed(now, "下游超时".to_string(), Some(now - Duration::seconds(1)));
    entries.update(&claim).await.unwrap();

    let due = entries.get_due_entries(now, 10).await.unwrap();
    assert!(due.iter().any(|e| e.id == claim.id));

    let counts = entries.count_by_status().await.unwrap();
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.total(), 3);

    let failed = entries
        .list(Some(ScheduleStatus::Failed), 10)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 1);
    assert_eq!(failed[0].error_message.as_deref(), Some("下游超时"));

    let all = entries.list(None, 2).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, due_first.id);

    manager.close().await;
}

#[tokio::test]
async fn test_terminal_failure_cannot_be_claimed() {
    let manager = setup_manager("sqlite::memory:".to_string()).await;
    let activities = SqliteActivityRepository::new(manager.pool().clone());
    let entries = SqliteScheduleEntryRepository::new(manager.pool().clone());

    let now = Utc::now();
    let activity = activities
        .create(&Activity::new("过期清理", now))
        .await
        .unwrap();
    let mut entry = entries
        .create(&ScheduleEntry::new(
            activity.id,
            now,
            TaskPayload::CreditExpiry { before: now },
            now,
        ))
        .await
        .unwrap();
    entry.mark_executing(now).unwrap();
    entry.mark_failed(now, "失败".to_string(), None);
    entries.update(&entry).await.unwrap();

    let mut attempt = entry.clone();
    attempt.status = ScheduleStatus::Executing;
    assert!(!entries
        .update_if_status(&attempt, ScheduleStatus::Failed)
        .await
        .unwrap());
    assert!(entries.get_due_entries(now, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_executing_and_atomic_completion() {
    let manager = setup_manager("sqlite::memory:".to_string()).await;
    let activities = SqliteActivityRepository::new(manager.pool().clone());
    let repo = SqliteScheduleEntryRepository::new(manager.pool().clone());
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    let activity = activities
        .create(&Activity::new("每日签到", now).with_recurrence(RecurrencePattern::Daily, 1))
        .await
        .unwrap();

    let mut stale = repo
        .create(&ScheduleEntry::new(activity.id, now, grant_payload(), now))
        .await
        .unwrap();
    stale.mark_executing(now - Duration::minutes(10)).unwrap();
    repo.update(&stale).await.unwrap();

    let mut fresh = repo
        .create(&ScheduleEntry::new(activity.id, now, grant_payload(), now))
        .await
        .unwrap();
    fresh.mark_executing(now).unwrap();
    repo.update(&fresh).await.unwrap();

    let found = repo
        .get_stale_executing(now - Duration::minutes(5), 10)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, stale.id);

    stale.mark_completed(now, Some("ok".to_string()));
    let next = ScheduleEntry::new(activity.id, now + Duration::days(1), grant_payload(), now);
    let created = repo
        .complete_with_next(&stale, Some(&next))
        .await
        .unwrap()
        .unwrap();
    assert!(created.id > fresh.id);
    let stored = repo.get_by_id(stale.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduleStatus::Completed);
    assert_eq!(stored.result.as_deref(), Some("ok"));

    // 已完成条目不存在时整个事务回滚，后续条目也不会插入
    let mut missing = stale.clone();
    missing.id = 9_999;
    let err = repo
        .complete_with_next(&missing, Some(&next))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ScheduleEntryNotFound { .. }));
    assert_eq!(repo.list(None, 100).await.unwrap().len(), 3);
}
