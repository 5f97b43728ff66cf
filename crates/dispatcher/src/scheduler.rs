use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use courier_config::SchedulerConfig;
use courier_domain::{
    Activity, ActivityRepository, Clock, ScheduleEntry, ScheduleEntryRepository, ScheduleStatus,
    StatusCounts, SystemClock, TaskPayload, TaskType,
};
use courier_errors::{SchedulerError, SchedulerResult};
use courier_infrastructure::{MetricsCollector, StructuredLogger};

use crate::audit::{AuditSink, ExecutionOutcome, OutcomeKind, TracingAuditSink};
use crate::backoff::BackoffCalculator;
use crate::recurrence::RecurrencePlanner;
use crate::registry::TaskHandlerRegistry;

/// 调度器运行参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub max_concurrent_tasks: usize,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub backoff_multiplier: f64,
    pub poll_batch_size: usize,
    pub execution_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            max_concurrent_tasks: config.max_concurrent_tasks,
            max_attempts: config.max_attempts,
            retry_base: Duration::from_secs(config.retry_base_seconds),
            backoff_multiplier: config.backoff_multiplier,
            poll_batch_size: config.poll_batch_size,
            execution_timeout: Duration::from_secs(config.execution_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub settings: SchedulerSettings,
    pub counts: StatusCounts,
    pub registered_task_types: Vec<TaskType>,
}

struct LoopState {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// 轮询式任务调度器
///
/// 每个轮询周期取出到期条目，交给固定数量的工作者并发执行，
/// 等全部执行结束后才会进入下一个周期。周期之间从不重叠，
/// 因此一个耗时很长的周期会推迟下一次轮询，吞吐上限约为
/// `max_concurrent_tasks / 单个任务耗时`。
pub struct TaskScheduler {
    entry_repo: Arc<dyn ScheduleEntryRepository>,
    activity_repo: Arc<dyn ActivityRepository>,
    registry: TaskHandlerRegistry,
    audit_sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    settings: SchedulerSettings,
    backoff: BackoffCalculator,
    loop_state: Mutex<Option<LoopState>>,
}

impl TaskScheduler {
    pub fn new(
        entry_repo: Arc<dyn ScheduleEntryRepository>,
        activity_repo: Arc<dyn ActivityRepository>,
        registry: TaskHandlerRegistry,
        settings: SchedulerSettings,
    ) -> Self {
        let backoff = BackoffCalculator::new(settings.retry_base, settings.backoff_multiplier);
        Self {
            entry_repo,
            activity_repo,
            registry,
            audit_sink: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(MetricsCollector::new()),
            settings,
            backoff,
            loop_state: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &TaskHandlerRegistry {
        &self.registry
    }

    /// 启动轮询循环；已在运行时返回 `AlreadyRunning`
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        let mut state = self.loop_state.lock().await;
        if state.is_some() {
            warn!("任务调度器已经在运行中");
            return Err(SchedulerError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            scheduler.run_polling_loop(shutdown_rx).await;
        });

        *state = Some(LoopState {
            shutdown_tx,
            handle,
        });

        info!(
            "任务调度器已启动，轮询间隔 {:?}，最大并发 {}",
            self.settings.poll_interval, self.settings.max_concurrent_tasks
        );
        Ok(())
    }

    /// 停止轮询循环并等待当前周期结束；未运行时返回 `NotRunning`
    ///
    /// 等待期间不持有状态锁，`is_running` 在停止开始后立即返回 `false`。
    pub async fn stop(&self) -> SchedulerResult<()> {
        let taken = self.loop_state.lock().await.take();
        let Some(loop_state) = taken else {
            warn!("任务调度器未在运行");
            return Err(SchedulerError::NotRunning);
        };

        // 接收端已退出时发送失败，可以忽略
        let _ = loop_state.shutdown_tx.send(());
        if let Err(e) = loop_state.handle.await {
            error!("轮询循环异常退出: {}", e);
        }

        info!("任务调度器已停止");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.loop_state.lock().await.is_some()
    }

    async fn run_polling_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，退出轮询循环");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_poll_cycle().await {
                        StructuredLogger::log_system_error("task_scheduler", "poll_cycle", &e);
                    }
                }
            }
        }
    }

    /// 执行一次轮询周期，返回本周期派发的条目数
    ///
    /// 周期开始时先接管中断的执行（见 [`Self::recover_stale_entries`]）。
    /// 查询条目失败时整个周期中止并返回错误，下个周期会重新查询。
    pub async fn run_poll_cycle(&self) -> SchedulerResult<usize> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("poll_cycle", cycle_id = %cycle_id);

        async move {
            let started = Instant::now();
            self.recover_stale_entries().await?;

            let now = self.clock.now();
            let due = self
                .entry_repo
                .get_due_entries(now, self.settings.poll_batch_size)
                .await?;

            let dispatched = due.len();
            if dispatched == 0 {
                debug!("本周期没有到期的调度条目");
            } else {
                info!("本周期发现 {} 个到期调度条目", dispatched);
                self.dispatch(due).await;
            }

            self.metrics.record_poll_cycle(started.elapsed().as_secs_f64());
            Ok::<usize, SchedulerError>(dispatched)
        }
        .instrument(span)
        .await
    }

    /// 固定数量的工作者从有界通道取条目执行，全部结束后返回
    async fn dispatch(&self, entries: Vec<ScheduleEntry>) {
        let capacity = self.settings.max_concurrent_tasks.max(1);
        let worker_count = capacity.min(entries.len());
        let (tx, rx) = mpsc::channel::<ScheduleEntry>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let producer = async move {
            for entry in entries {
                if tx.send(entry).await.is_err() {
                    break;
                }
            }
        };

        let workers = (0..worker_count).map(|worker_index| {
            let rx = Arc::clone(&rx);
            async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(entry) = next else {
                        break;
                    };
                    let entry_id = entry.id;
                    if let Err(e) = self.execute_task(entry).await {
                        error!(
                            worker = worker_index,
                            "执行调度条目 {} 时发生错误: {}", entry_id, e
                        );
                    }
                }
            }
        });

        futures::join!(producer, join_all(workers));
    }

    /// 拾取并执行单个条目
    ///
    /// 返回执行后的条目；条目已被其他执行者拾取时返回 `None`。
    pub async fn execute_task(
        &self,
        entry: ScheduleEntry,
    ) -> SchedulerResult<Option<ScheduleEntry>> {
        let expected = entry.status;
        let mut claimed = entry;
        claimed.mark_executing(self.clock.now())?;

        if !self.entry_repo.update_if_status(&claimed, expected).await? {
            debug!("调度条目 {} 已被其他执行者拾取，跳过", claimed.id);
            return Ok(None);
        }

        let task_type = claimed.payload.task_type();
        StructuredLogger::log_execution_start(
            claimed.id,
            claimed.activity_id,
            task_type.as_str(),
            claimed.retry_count + 1,
        );

        let started = Instant::now();
        let outcome = self.invoke_handler(task_type, &claimed.payload).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let finished_at = self.clock.now();

        let finished = match outcome {
            Ok(result) => {
                StructuredLogger::log_execution_complete(
                    claimed.id,
                    task_type.as_str(),
                    true,
                    duration_ms,
                    None,
                );
                self.complete(claimed, result, finished_at).await?
            }
            Err(err) => {
                let message = err.to_string();
                StructuredLogger::log_execution_complete(
                    claimed.id,
                    task_type.as_str(),
                    false,
                    duration_ms,
                    Some(&message),
                );
                self.fail(claimed, message, finished_at).await?
            }
        };

        Ok(Some(finished))
    }

    async fn invoke_handler(
        &self,
        task_type: TaskType,
        payload: &TaskPayload,
    ) -> SchedulerResult<Option<String>> {
        let handler = self
            .registry
            .get(task_type)
            .await
            .ok_or_else(|| SchedulerError::HandlerNotFound {
                task_type: task_type.to_string(),
            })?;

        let invocation = AssertUnwindSafe(handler.handle(payload)).catch_unwind();
        match tokio::time::timeout(self.settings.execution_timeout, invocation).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SchedulerError::TaskExecution(format!(
                "处理器 {} 执行时发生panic",
                handler.name()
            ))),
            Err(_) => Err(SchedulerError::ExecutionTimeout {
                seconds: self.settings.execution_timeout.as_secs(),
            }),
        }
    }

    async fn complete(
        &self,
        mut entry: ScheduleEntry,
        result: Option<String>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> SchedulerResult<ScheduleEntry> {
        entry.mark_completed(now, result);

        // 完成状态和后续条目一起写入；任一步失败条目都停留在 EXECUTING，由恢复流程重试
        let next = self.plan_next_occurrence(&entry, now).await?;
        let created = self
            .entry_repo
            .complete_with_next(&entry, next.as_ref())
            .await?;
        self.metrics.record_task_execution(true);

        self.audit_sink
            .record(&ExecutionOutcome {
                entry_id: entry.id,
                activity_id: entry.activity_id,
                task_type: entry.payload.task_type(),
                kind: OutcomeKind::Succeeded,
                message: entry.result.clone(),
                retry_count: entry.retry_count,
                occurred_at: now,
            })
            .await;

        if let Some(created) = created {
            StructuredLogger::log_entry_scheduled(
                created.id,
                created.activity_id,
                created.payload.task_type().as_str(),
                created.scheduled_at,
            );
        }
        Ok(entry)
    }

    async fn fail(
        &self,
        mut entry: ScheduleEntry,
        message: String,
        now: chrono::DateTime<chrono::Utc>,
    ) -> SchedulerResult<ScheduleEntry> {
        let next_retry_at = self.apply_failure(&mut entry, &message, now)?;
        self.entry_repo.update(&entry).await?;
        self.report_failure(&entry, message, next_retry_at, now).await;
        Ok(entry)
    }

    /// 计入一次失败尝试，返回下一次重试时间；达到上限时返回 `None`
    fn apply_failure(
        &self,
        entry: &mut ScheduleEntry,
        message: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> SchedulerResult<Option<chrono::DateTime<chrono::Utc>>> {
        entry.retry_count = entry.retry_count.saturating_add(1);

        let next_retry_at = if entry.retry_count >= self.settings.max_attempts {
            None
        } else {
            let delay = chrono::Duration::from_std(self.backoff.next_delay(entry.retry_count))
                .map_err(|e| SchedulerError::Internal(format!("退避时长转换失败: {e}")))?;
            Some(now.checked_add_signed(delay).ok_or_else(|| {
                SchedulerError::Internal("下一次重试时间超出可表示范围".to_string())
            })?)
        };

        entry.mark_failed(now, message.to_string(), next_retry_at);
        Ok(next_retry_at)
    }

    async fn report_failure(
        &self,
        entry: &ScheduleEntry,
        message: String,
        next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        self.metrics.record_task_execution(false);

        let kind = match next_retry_at {
            Some(retry_at) => {
                self.metrics.record_task_retry();
                StructuredLogger::log_retry_scheduled(
                    entry.id,
                    entry.retry_count,
                    self.settings.max_attempts,
                    retry_at,
                );
                OutcomeKind::RetryScheduled
            }
            None => {
                let exhausted = SchedulerError::RetriesExhausted {
                    entry_id: entry.id,
                    attempts: entry.retry_count,
                };
                error!("{}，最后一次错误: {}", exhausted, message);
                OutcomeKind::Exhausted
            }
        };

        self.audit_sink
            .record(&ExecutionOutcome {
                entry_id: entry.id,
                activity_id: entry.activity_id,
                task_type: entry.payload.task_type(),
                kind,
                message: Some(message),
                retry_count: entry.retry_count,
                occurred_at: now,
            })
            .await;
    }

    /// 接管超过执行超时仍停留在 EXECUTING 的条目，按一次失败尝试处理
    ///
    /// 结果写回失败或进程在执行中退出都会留下这类条目。处理器调用受
    /// `execution_timeout` 约束，超时之后这些条目已经没有执行者。
    /// 写入用比较并交换，只有仍为 EXECUTING 的条目会被改写。返回接管的条目数。
    pub async fn recover_stale_entries(&self) -> SchedulerResult<usize> {
        let now = self.clock.now();
        let timeout = chrono::Duration::from_std(self.settings.execution_timeout)
            .map_err(|e| SchedulerError::Internal(format!("执行超时转换失败: {e}")))?;
        let Some(cutoff) = now.checked_sub_signed(timeout) else {
            return Ok(0);
        };

        let stale = self
            .entry_repo
            .get_stale_executing(cutoff, self.settings.poll_batch_size)
            .await?;

        let mut recovered = 0;
        for mut entry in stale {
            let message = format!(
                "执行中断：超过 {} 秒仍未写回结果",
                self.settings.execution_timeout.as_secs()
            );
            let next_retry_at = self.apply_failure(&mut entry, &message, now)?;
            if !self
                .entry_repo
                .update_if_status(&entry, ScheduleStatus::Executing)
                .await?
            {
                debug!("调度条目 {} 已写回结果，无需接管", entry.id);
                continue;
            }

            warn!("调度条目 {} 执行中断，已按失败处理", entry.id);
            self.report_failure(&entry, message, next_retry_at, now).await;
            recovered += 1;
        }

        if recovered > 0 {
            info!("本周期接管 {} 个中断的调度条目", recovered);
        }
        Ok(recovered)
    }

    /// 重复活动执行成功后的下一次条目，尚未持久化
    async fn plan_next_occurrence(
        &self,
        completed: &ScheduleEntry,
        now: chrono::DateTime<chrono::Utc>,
    ) -> SchedulerResult<Option<ScheduleEntry>> {
        let Some(activity) = self.activity_repo.get_by_id(completed.activity_id).await? else {
            warn!(
                "调度条目 {} 关联的活动 {} 不存在，无法续排",
                completed.id, completed.activity_id
            );
            return Ok(None);
        };
        let Some(pattern) = activity.recurrence else {
            return Ok(None);
        };

        let next_at = RecurrencePlanner::next_after(
            completed.scheduled_at,
            pattern,
            activity.interval,
            now,
            activity.end_at,
        )?;
        let Some(next_at) = next_at else {
            info!("活动 {} 已到结束时间，不再续排", activity.id);
            return Ok(None);
        };

        Ok(Some(ScheduleEntry::new(
            activity.id,
            next_at,
            completed.payload.clone(),
            now,
        )))
    }

    /// 登记活动，供外部协作方或演示使用
    pub async fn register_activity(&self, activity: Activity) -> SchedulerResult<Activity> {
        activity.validate()?;
        let created = self.activity_repo.create(&activity).await?;
        info!("活动 {} ({}) 已登记", created.id, created.name);
        Ok(created)
    }

    /// 为活动创建一个待执行条目
    pub async fn schedule_activity(
        &self,
        activity_id: i64,
        scheduled_at: chrono::DateTime<chrono::Utc>,
        payload: TaskPayload,
    ) -> SchedulerResult<ScheduleEntry> {
        if self.activity_repo.get_by_id(activity_id).await?.is_none() {
            return Err(SchedulerError::activity_not_found(activity_id));
        }
        payload.validate()?;

        let task_type = payload.task_type();
        if !self.registry.contains(task_type).await {
            return Err(SchedulerError::HandlerNotFound {
                task_type: task_type.to_string(),
            });
        }

        let entry = ScheduleEntry::new(activity_id, scheduled_at, payload, self.clock.now());
        let created = self.entry_repo.create(&entry).await?;
        StructuredLogger::log_entry_scheduled(
            created.id,
            created.activity_id,
            task_type.as_str(),
            created.scheduled_at,
        );
        Ok(created)
    }

    /// 取消条目，只允许从 PENDING 或可重试的 FAILED 状态取消
    pub async fn cancel_scheduled_task(&self, entry_id: i64) -> SchedulerResult<ScheduleEntry> {
        let mut entry = self
            .entry_repo
            .get_by_id(entry_id)
            .await?
            .ok_or_else(|| SchedulerError::entry_not_found(entry_id))?;

        let expected = entry.status;
        entry.cancel(self.clock.now())?;

        if !self.entry_repo.update_if_status(&entry, expected).await? {
            let current = self
                .entry_repo
                .get_by_id(entry_id)
                .await?
                .ok_or_else(|| SchedulerError::entry_not_found(entry_id))?;
            return Err(SchedulerError::InvalidStateTransition {
                entry_id,
                from: current.status.to_string(),
                action: "cancel".to_string(),
            });
        }

        info!("调度条目 {} 已取消", entry_id);
        Ok(entry)
    }

    pub async fn get_scheduled_tasks(
        &self,
        status: Option<ScheduleStatus>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>> {
        self.entry_repo.list(status, limit).await
    }

    pub async fn get_scheduler_status(&self) -> SchedulerResult<SchedulerStatus> {
        Ok(SchedulerStatus {
            running: self.is_running().await,
            settings: self.settings.clone(),
            counts: self.entry_repo.count_by_status().await?,
            registered_task_types: self.registry.registered_task_types().await,
        })
    }
}
