//! 进程内仓储实现
//!
//! 用于 `backend = "memory"` 和测试。数据保存在 `RwLock<HashMap>` 中，
//! 比较并交换在写锁内完成，因此单进程内的拾取是原子的。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

use courier_domain::{
    Activity, ActivityRepository, Courier, CourierRepository, ScheduleEntry,
    ScheduleEntryRepository, ScheduleStatus, StatusCounts,
};
use courier_errors::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone)]
pub struct InMemoryCourierRepository {
    couriers: Arc<RwLock<HashMap<i64, Courier>>>,
    next_id: Arc<Mutex<i64>>,
}

impl InMemoryCourierRepository {
    pub fn new() -> Self {
        Self {
            couriers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub async fn count(&self) -> usize {
        self.couriers.read().await.len()
    }
}

impl Default for InMemoryCourierRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CourierRepository for InMemoryCourierRepository {
    #[instrument(skip(self, courier), fields(user_id = %courier.user_id, level = courier.level.value()))]
    async fn create(&self, courier: &Courier) -> SchedulerResult<Courier> {
        let mut couriers = self.couriers.write().await;
        if couriers.values().any(|c| c.user_id == courier.user_id) {
            return Err(SchedulerError::DuplicateCourier {
                user_id: courier.user_id.clone(),
            });
        }

        let mut next_id = self.next_id.lock().await;
        let mut created = courier.clone();
        created.id = *next_id;
        *next_id += 1;

        couriers.insert(created.id, created.clone());
        debug!("创建信使成功: ID {}", created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Courier>> {
        Ok(self.couriers.read().await.get(&id).cloned())
    }

    async fn get_by_user_id(&self, user_id: &str) -> SchedulerResult<Option<Courier>> {
        Ok(self
            .couriers
            .read()
            .await
            .values()
            .find(|c| c.user_id == user_id)
            .cloned())
    }

    async fn get_children(&self, parent_id: i64) -> SchedulerResult<Vec<Courier>> {
        let mut children: Vec<Courier> = self
            .couriers
            .read()
            .await
            .values()
            .filter(|c| c.parent_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|c| c.id);
        Ok(children)
    }

    #[instrument(skip(self, courier), fields(courier_id = courier.id))]
    async fn update(&self, courier: &Courier) -> SchedulerResult<()> {
        let mut couriers = self.couriers.write().await;
        match couriers.get_mut(&courier.id) {
            Some(existing) => {
                *existing = courier.clone();
                debug!("更新信使成功: ID {}", courier.id);
                Ok(())
            }
            None => Err(SchedulerError::courier_not_found(courier.id)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryActivityRepository {
    activities: Arc<RwLock<HashMap<i64, Activity>>>,
    next_id: Arc<Mutex<i64>>,
}

impl InMemoryActivityRepository {
    pub fn new() -> Self {
        Self {
            activities: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }
}

impl Default for InMemoryActivityRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityRepository for InMemoryActivityRepository {
    #[instrument(skip(self, activity), fields(name = %activity.name))]
    async fn create(&self, activity: &Activity) -> SchedulerResult<Activity> {
        let mut activities = self.activities.write().await;
        let mut next_id = self.next_id.lock().await;

        let mut created = activity.clone();
        created.id = *next_id;
        *next_id += 1;

        activities.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Activity>> {
        Ok(self.activities.read().await.get(&id).cloned())
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryScheduleEntryRepository {
    entries: Arc<RwLock<HashMap<i64, ScheduleEntry>>>,
    next_id: Arc<Mutex<i64>>,
}

impl InMemoryScheduleEntryRepository {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub async fn get_all_entries(&self) -> Vec<ScheduleEntry> {
        let mut entries: Vec<ScheduleEntry> =
            self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }
}

impl Default for InMemoryScheduleEntryRepository {
    fn default() -> Self {
        Self::new()
    }
}

/// 存储中的条目是否仍处于 `expected` 状态；FAILED 只匹配可重试失败
fn status_matches(stored: &ScheduleEntry, expected: ScheduleStatus) -> bool {
    stored.status == expected
        && (expected != ScheduleStatus::Failed || stored.next_retry_at.is_some())
}

#[async_trait]
impl ScheduleEntryRepository for InMemoryScheduleEntryRepository {
    #[instrument(skip(self, entry), fields(activity_id = entry.activity_id))]
    async fn create(&self, entry: &ScheduleEntry) -> SchedulerResult<ScheduleEntry> {
        let mut entries = self.entries.write().await;
        let mut next_id = self.next_id.lock().await;

        let mut created = entry.clone();
        created.id = *next_id;
        *next_id += 1;

        entries.insert(created.id, created.clone());
        debug!("创建调度条目成功: ID {}", created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduleEntry>> {
        Ok(self.entries.read().await.get(&id).cloned())
    }

    #[instrument(skip(self, entry), fields(entry_id = entry.id, status = %entry.status))]
    async fn update(&self, entry: &ScheduleEntry) -> SchedulerResult<()> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&entry.id) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(SchedulerError::entry_not_found(entry.id)),
        }
    }

    #[instrument(skip(self, completed, next), fields(entry_id = completed.id))]
    async fn complete_with_next(
        &self,
        completed: &ScheduleEntry,
        next: Option<&ScheduleEntry>,
    ) -> SchedulerResult<Option<ScheduleEntry>> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&completed.id) {
            return Err(SchedulerError::entry_not_found(completed.id));
        }

        let created = match next {
            Some(next) => {
                let mut next_id = self.next_id.lock().await;
                let mut created = next.clone();
                created.id = *next_id;
                *next_id += 1;
                entries.insert(created.id, created.clone());
                Some(created)
            }
            None => None,
        };
        entries.insert(completed.id, completed.clone());
        Ok(created)
    }

    #[instrument(skip(self, entry), fields(entry_id = entry.id, expected = %expected))]
    async fn update_if_status(
        &self,
        entry: &ScheduleEntry,
        expected: ScheduleStatus,
    ) -> SchedulerResult<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&entry.id) {
            Some(existing) if status_matches(existing, expected) => {
                *existing = entry.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(SchedulerError::entry_not_found(entry.id)),
        }
    }

    #[instrument(skip(self))]
    async fn get_due_entries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>> {
        let entries = self.entries.read().await;
        let mut due: Vec<(DateTime<Utc>, ScheduleEntry)> = entries
            .values()
            .filter_map(|e| {
                e.due_at()
                    .filter(|due_at| *due_at <= now)
                    .map(|due_at| (due_at, e.clone()))
            })
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.id.cmp(&b.1.id)));
        Ok(due.into_iter().take(limit).map(|(_, e)| e).collect())
    }

    async fn get_stale_executing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>> {
        let entries = self.entries.read().await;
        let mut stale: Vec<(DateTime<Utc>, ScheduleEntry)> = entries
            .values()
            .filter(|e| e.status == ScheduleStatus::Executing)
            .filter_map(|e| {
                e.started_at
                    .filter(|started| *started <= started_before)
                    .map(|started| (started, e.clone()))
            })
            .collect();
        stale.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.id.cmp(&b.1.id)));
        Ok(stale.into_iter().take(limit).map(|(_, e)| e).collect())
    }

    async fn list(
        &self,
        status: Option<ScheduleStatus>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>> {
        let entries = self.entries.read().await;
        let mut matched: Vec<ScheduleEntry> = entries
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn count_by_status(&self) -> SchedulerResult<StatusCounts> {
        let entries = self.entries.read().await;
        let mut counts = StatusCounts::default();
        for entry in entries.values() {
            counts.record(entry.status);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use courier_domain::{CourierLevel, CourierStatus, TaskPayload, ZoneCode};

    fn courier(user_id: &str) -> Courier {
        let now = Utc::now();
        Courier {
            id: 0,
            user_id: user_id.to_string(),
            level: CourierLevel::City,
            parent_id: None,
            zone_code: ZoneCode::parse("BJ").unwrap(),
            status: CourierStatus::Active,
            jurisdiction: "BJ".to_string(),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn entry(scheduled_at: DateTime<Utc>) -> ScheduleEntry {
        ScheduleEntry::new(
            1,
            scheduled_at,
            TaskPayload::CreditExpiry {
                before: scheduled_at,
            },
            scheduled_at,
        )
    }

    #[tokio::test]
    async fn test_courier_duplicate_user_id_rejected() {
        let repo = InMemoryCourierRepository::new();
        let created = repo.create(&courier("u1")).await.unwrap();
        assert_eq!(created.id, 1);

        let err = repo.create(&courier("u1")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateCourier { .. }));
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn test_get_children_ordered_by_id() {
        let repo = InMemoryCourierRepository::new();
        let root = repo.create(&courier("root")).await.unwrap();
        for user in ["c", "a", "b"] {
            let mut child = courier(user);
            child.level = CourierLevel::School;
            child.parent_id = Some(root.id);
            repo.create(&child).await.unwrap();
        }

        let children = repo.get_children(root.id).await.unwrap();
        let ids: Vec<i64> = children.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert!(repo.get_children(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_entries_ordering_and_limit() {
        let repo = InMemoryScheduleEntryRepository::new();
        let now = Utc::now();

        let late = repo.create(&entry(now - Duration::minutes(1))).await.unwrap();
        let early = repo.create(&entry(now - Duration::minutes(10))).await.unwrap();
        repo.create(&entry(now + Duration::minutes(5))).await.unwrap();

        let mut retry = repo.create(&entry(now - Duration::hours(1))).await.unwrap();
        retry.mark_executing(now).unwrap();
        retry.mark_failed(now, "boom".to_string(), Some(now - Duration::minutes(5)));
        repo.update(&retry).await.unwrap();

        let mut terminal = repo.create(&entry(now - Duration::hours(2))).await.unwrap();
        terminal.mark_executing(now).unwrap();
        terminal.mark_failed(now, "boom".to_string(), None);
        repo.update(&terminal).await.unwrap();

        let due = repo.get_due_entries(now, 10).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![early.id, retry.id, late.id]);

        let due = repo.get_due_entries(now, 1).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, early.id);
    }

    #[tokio::test]
    async fn test_update_if_status_is_compare_and_set() {
        let repo = InMemoryScheduleEntryRepository::new();
        let now = Utc::now();
        let created = repo.create(&entry(now)).await.unwrap();

        let mut first = created.clone();
        first.mark_executing(now).unwrap();
        assert!(repo
            .update_if_status(&first, ScheduleStatus::Pending)
            .await
            .unwrap());

        let mut second = created.clone();
        second.mark_executing(now).unwrap();
        assert!(!repo
            .update_if_status(&second, ScheduleStatus::Pending)
            .await
            .unwrap());

        let mut missing = created.clone();
        missing.id = 42;
        assert!(repo
            .update_if_status(&missing, ScheduleStatus::Pending)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_complete_with_next_writes_both() {
        let repo = InMemoryScheduleEntryRepository::new();
        let now = Utc::now();
        let mut running = repo.create(&entry(now)).await.unwrap();
        running.mark_executing(now).unwrap();
        repo.update(&running).await.unwrap();

        running.mark_completed(now, None);
        let next = entry(now + Duration::days(1));
        let created = repo
            .complete_with_next(&running, Some(&next))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.id, 2);

        let all = repo.get_all_entries().await;
        assert_eq!(all[0].status, ScheduleStatus::Completed);
        assert_eq!(all[1].status, ScheduleStatus::Pending);

        let mut missing = running.clone();
        missing.id = 42;
        assert!(repo.complete_with_next(&missing, Some(&next)).await.is_err());
        assert_eq!(repo.get_all_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_executing_filters_by_start_time() {
        let repo = InMemoryScheduleEntryRepository::new();
        let now = Utc::now();

        let mut old = repo.create(&entry(now)).await.unwrap();
        old.mark_executing(now - Duration::minutes(10)).unwrap();
        repo.update(&old).await.unwrap();

        let mut fresh = repo.create(&entry(now)).await.unwrap();
        fresh.mark_executing(now).unwrap();
        repo.update(&fresh).await.unwrap();

        repo.create(&entry(now - Duration::hours(1))).await.unwrap();

        let stale = repo
            .get_stale_executing(now - Duration::minutes(5), 10)
            .await
            .unwrap();
        let ids: Vec<i64> = stale.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![old.id]);
    }

    #[tokio::test]
    async fn test_list_and_counts() {
        let repo = InMemoryScheduleEntryRepository::new();
        let now = Utc::now();
        repo.create(&entry(now + Duration::hours(2))).await.unwrap();
        let first = repo.create(&entry(now + Duration::hours(1))).await.unwrap();

        let mut done = repo.create(&entry(now)).await.unwrap();
        done.mark_executing(now).unwrap();
        done.mark_completed(now, None);
        repo.update(&done).await.unwrap();

        let pending = repo.list(Some(ScheduleStatus::Pending), 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);

        let all = repo.list(None, 2).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, done.id);

        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.total(), 3);
    }
}
