#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use courier_dispatcher::{
        OutcomeKind, SchedulerSettings, TaskHandler, TaskHandlerRegistry, TaskScheduler,
    };
    use courier_domain::{Activity, ScheduleStatus, SchedulerError, TaskType};
    use courier_infrastructure::{InMemoryActivityRepository, InMemoryScheduleEntryRepository};
    use courier_testing_utils::{
        base_time, custom_payload, test_settings, FailingHandler, MockClock, RecordingAuditSink,
        SlowHandler,
    };

    struct Harness {
        scheduler: TaskScheduler,
        clock: MockClock,
        audit: RecordingAuditSink,
        activity_id: i64,
    }

    async fn harness(handler: Arc<dyn TaskHandler>, settings: SchedulerSettings) -> Harness {
        let clock = MockClock::new(base_time());
        let audit = RecordingAuditSink::new();
        let registry = TaskHandlerRegistry::new();
        registry.register(TaskType::Custom, handler).await;

        let scheduler = TaskScheduler::new(
            Arc::new(InMemoryScheduleEntryRepository::new()),
            Arc::new(InMemoryActivityRepository::new()),
            registry,
            settings,
        )
        .with_clock(Arc::new(clock.clone()))
        .with_audit_sink(Arc::new(audit.clone()));

        let activity = scheduler
            .register_activity(Activity::new("重试", base_time()))
            .await
            .unwrap();

        Harness {
            scheduler,
            clock,
            audit,
            activity_id: activity.id,
        }
    }

    #[tokio::test]
    async fn test_backoff_sequence_until_exhausted() {
        let failing = FailingHandler::always();
        let h = harness(Arc::new(failing.clone()), test_settings()).await;
        let entry = h
            .scheduler
            .schedule_activity(h.activity_id, base_time(), custom_payload("flaky"))
            .await
            .unwrap();

        // 第一次失败：1分钟后重试
        h.scheduler.run_poll_cycle().await.unwrap();
        let failed = h.scheduler.get_scheduled_tasks(None, 10).await.unwrap();
        assert_eq!(failed[0].id, entry.id);
        assert_eq!(failed[0].status, ScheduleStatus::Failed);
        assert_eq!(failed[0].retry_count, 1);
        assert_eq!(
            failed[0].next_retry_at,
            Some(base_time() + ChronoDuration::minutes(1))
        );

        // 重试时间未到
        h.clock.advance(ChronoDuration::seconds(30));
        assert_eq!(h.scheduler.run_poll_cycle().await.unwrap(), 0);

        // 第二次失败：2分钟后重试
        h.clock.set(base_time() + ChronoDuration::minutes(1));
        assert_eq!(h.scheduler.run_poll_cycle().await.unwrap(), 1);
        let failed = h.scheduler.get_scheduled_tasks(None, 10).await.unwrap();
        assert_eq!(failed[0].retry_count, 2);
        assert_eq!(
            failed[0].next_retry_at,
            Some(base_time() + ChronoDuration::minutes(3))
        );

        // 第三次失败：终态
        h.clock.set(base_time() + ChronoDuration::minutes(3));
        assert_eq!(h.scheduler.run_poll_cycle().await.unwrap(), 1);
        let failed = h.scheduler.get_scheduled_tasks(None, 10).await.unwrap();
        assert_eq!(failed[0].status, ScheduleStatus::Failed);
        assert_eq!(failed[0].retry_count, 3);
        assert!(failed[0].next_retry_at.is_none());
        assert!(failed[0].completed_at.is_some());

        // 终态失败不会再被拾取，也不能取消
        h.clock.advance(ChronoDuration::days(30));
        assert_eq!(h.scheduler.run_poll_cycle().await.unwrap(), 0);
        assert_eq!(failing.attempts(), 3);
        let err = h
            .scheduler
            .cancel_scheduled_task(entry.id)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidStateTransition { .. }));

        let kinds: Vec<OutcomeKind> = h.audit.outcomes().iter().map(|o| o.kind).collect();
        assert_eq!(
            kinds,
            vec![
                OutcomeKind::RetryScheduled,
                OutcomeKind::RetryScheduled,
                OutcomeKind::Exhausted
            ]
        );
    }

    #[tokio::test]
    async fn test_success_after_retry_resets_count() {
        let failing = FailingHandler::times(1);
        let h = harness(Arc::new(failing.clone()), test_settings()).await;
        h.scheduler
            .schedule_activity(h.activity_id, base_time(), custom_payload("once-flaky"))
            .await
            .unwrap();

        h.scheduler.run_poll_cycle().await.unwrap();
        h.clock.advance(ChronoDuration::minutes(1));
        h.scheduler.run_poll_cycle().await.unwrap();

        let entries = h.scheduler.get_scheduled_tasks(None, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ScheduleStatus::Completed);
        assert_eq!(entries[0].retry_count, 0);
        assert!(entries[0].error_message.is_none());
        assert_eq!(failing.attempts(), 2);

        let outcomes = h.audit.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].kind, OutcomeKind::Succeeded);
    }

    #[tokio::test]
    async fn test_retryable_failure_can_be_cancelled() {
        let h = harness(Arc::new(FailingHandler::always()), test_settings()).await;
        let entry = h
            .scheduler
            .schedule_activity(h.activity_id, base_time(), custom_payload("cancel-after-fail"))
            .await
            .unwrap();
        h.scheduler.run_poll_cycle().await.unwrap();

        let cancelled = h.scheduler.cancel_scheduled_task(entry.id).await.unwrap();
        assert_eq!(cancelled.status, ScheduleStatus::Cancelled);
        assert!(cancelled.next_retry_at.is_none());

        h.clock.advance(ChronoDuration::hours(1));
        assert_eq!(h.scheduler.run_poll_cycle().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handler_timeout_is_retryable_failure() {
        let slow = SlowHandler::new(Duration::from_secs(5));
        let settings = SchedulerSettings {
            execution_timeout: Duration::from_secs(1),
            ..test_settings()
        };
        let h = harness(Arc::new(slow.clone()), settings).await;
        h.scheduler
            .schedule_activity(h.activity_id, base_time(), custom_payload("slow"))
            .await
            .unwrap();

        h.scheduler.run_poll_cycle().await.unwrap();

        let entries = h.scheduler.get_scheduled_tasks(None, 10).await.unwrap();
        assert_eq!(entries[0].status, ScheduleStatus::Failed);
        assert_eq!(entries[0].retry_count, 1);
        assert!(entries[0].next_retry_at.is_some());
        let expected = SchedulerError::ExecutionTimeout { seconds: 1 }.to_string();
        assert_eq!(entries[0].error_message.as_deref(), Some(expected.as_str()));
        assert_eq!(slow.completed(), 0);
    }
}
