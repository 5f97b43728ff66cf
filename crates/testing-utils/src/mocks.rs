//! Test doubles for handler, audit, clock and store seams
//!
//! These are intentionally simple: state lives behind `Arc<Mutex<..>>` or
//! atomics so clones share it and tests can inspect it after the fact.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_dispatcher::{AuditSink, ExecutionOutcome, TaskHandler};
use courier_domain::{
    Activity, ActivityRepository, Clock, ScheduleEntry, ScheduleEntryRepository, ScheduleStatus,
    StatusCounts, TaskPayload,
};
use courier_errors::{SchedulerError, SchedulerResult};
use courier_infrastructure::{InMemoryActivityRepository, InMemoryScheduleEntryRepository};

/// Clock whose time only moves when the test says so
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Handler that succeeds and remembers every payload it saw
#[derive(Debug, Clone)]
pub struct RecordingHandler {
    name: String,
    calls: Arc<Mutex<Vec<TaskPayload>>>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<TaskPayload> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, payload: &TaskPayload) -> SchedulerResult<Option<String>> {
        self.calls.lock().unwrap().push(payload.clone());
        Ok(Some(format!("{} handled {}", self.name, payload.task_type())))
    }
}

/// Handler that fails a fixed number of times before succeeding
#[derive(Debug, Clone)]
pub struct FailingHandler {
    failures_left: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl FailingHandler {
    pub fn always() -> Self {
        Self::times(usize::MAX)
    }

    pub fn times(failures: usize) -> Self {
        Self {
            failures_left: Arc::new(AtomicUsize::new(failures)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _payload: &TaskPayload) -> SchedulerResult<Option<String>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(SchedulerError::TaskExecution(format!(
                "simulated failure on attempt {attempt}"
            )));
        }
        Ok(Some(format!("succeeded on attempt {attempt}")))
    }
}

/// Handler that sleeps and tracks how many invocations overlap
#[derive(Debug, Clone)]
pub struct SlowHandler {
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl SlowHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for SlowHandler {
    fn name(&self) -> &str {
        "slow"
    }

    async fn handle(&self, _payload: &TaskPayload) -> SchedulerResult<Option<String>> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Audit sink that keeps every outcome in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingAuditSink {
    outcomes: Arc<Mutex<Vec<ExecutionOutcome>>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<ExecutionOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, outcome: &ExecutionOutcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }
}

/// In-memory entry store with a switch that makes every call fail
#[derive(Debug, Clone, Default)]
pub struct FlakyScheduleEntryRepository {
    inner: InMemoryScheduleEntryRepository,
    failing: Arc<AtomicBool>,
}

impl FlakyScheduleEntryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryScheduleEntryRepository {
        &self.inner
    }

    fn check(&self) -> SchedulerResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::database_error("simulated store outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduleEntryRepository for FlakyScheduleEntryRepository {
    async fn create(&self, entry: &ScheduleEntry) -> SchedulerResult<ScheduleEntry> {
        self.check()?;
        self.inner.create(entry).await
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduleEntry>> {
        self.check()?;
        self.inner.get_by_id(id).await
    }

    async fn update(&self, entry: &ScheduleEntry) -> SchedulerResult<()> {
        self.check()?;
        self.inner.update(entry).await
    }

    async fn complete_with_next(
        &self,
        completed: &ScheduleEntry,
        next: Option<&ScheduleEntry>,
    ) -> SchedulerResult<Option<ScheduleEntry>> {
        self.check()?;
        self.inner.complete_with_next(completed, next).await
    }

    async fn update_if_status(
        &self,
        entry: &ScheduleEntry,
        expected: ScheduleStatus,
    ) -> SchedulerResult<bool> {
        self.check()?;
        self.inner.update_if_status(entry, expected).await
    }

    async fn get_due_entries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>> {
        self.check()?;
        self.inner.get_due_entries(now, limit).await
    }

    async fn get_stale_executing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>> {
        self.check()?;
        self.inner.get_stale_executing(started_before, limit).await
    }

    async fn list(
        &self,
        status: Option<ScheduleStatus>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>> {
        self.check()?;
        self.inner.list(status, limit).await
    }

    async fn count_by_status(&self) -> SchedulerResult<StatusCounts> {
        self.check()?;
        self.inner.count_by_status().await
    }
}

/// In-memory activity store with the same outage switch
#[derive(Debug, Clone, Default)]
pub struct FlakyActivityRepository {
    inner: InMemoryActivityRepository,
    failing: Arc<AtomicBool>,
}

impl FlakyActivityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> SchedulerResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::database_error("simulated activity store outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl ActivityRepository for FlakyActivityRepository {
    async fn create(&self, activity: &Activity) -> SchedulerResult<Activity> {
        self.check()?;
        self.inner.create(activity).await
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Activity>> {
        self.check()?;
        self.inner.get_by_id(id).await
    }
}
