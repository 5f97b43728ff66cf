use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_domain::{
    ScheduleEntry, ScheduleEntryRepository, ScheduleStatus, StatusCounts, TaskPayload,
};
use courier_errors::{SchedulerError, SchedulerResult};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

const ENTRY_COLUMNS: &str = "id, activity_id, scheduled_at, status, retry_count, next_retry_at, \
                             payload, result, error_message, started_at, completed_at, \
                             created_at, updated_at";

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn insert_statement(entry: &ScheduleEntry, payload: String) -> SqliteQuery<'_> {
    sqlx::query(
        r#"
        INSERT INTO schedule_entries (activity_id, scheduled_at, status, retry_count,
                                      next_retry_at, payload, result, error_message,
                                      started_at, completed_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(entry.activity_id)
    .bind(entry.scheduled_at)
    .bind(entry.status)
    .bind(i64::from(entry.retry_count))
    .bind(entry.next_retry_at)
    .bind(payload)
    .bind(&entry.result)
    .bind(&entry.error_message)
    .bind(entry.started_at)
    .bind(entry.completed_at)
    .bind(entry.created_at)
    .bind(entry.updated_at)
}

fn update_statement(entry: &ScheduleEntry, payload: String) -> SqliteQuery<'_> {
    sqlx::query(
        r#"
        UPDATE schedule_entries
        SET scheduled_at = ?, status = ?, retry_count = ?, next_retry_at = ?, payload = ?,
            result = ?, error_message = ?, started_at = ?, completed_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(entry.scheduled_at)
    .bind(entry.status)
    .bind(i64::from(entry.retry_count))
    .bind(entry.next_retry_at)
    .bind(payload)
    .bind(&entry.result)
    .bind(&entry.error_message)
    .bind(entry.started_at)
    .bind(entry.completed_at)
    .bind(entry.updated_at)
    .bind(entry.id)
}

pub struct SqliteScheduleEntryRepository {
    pool: SqlitePool,
}

impl SqliteScheduleEntryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<ScheduleEntry> {
        let payload: String = row.try_get("payload")?;
        let payload: TaskPayload = serde_json::from_str(&payload)?;
        let retry_count: i64 = row.try_get("retry_count")?;
        let retry_count = u32::try_from(retry_count).map_err(|_| {
            SchedulerError::DatabaseOperation(format!("存储中的重试次数越界: {retry_count}"))
        })?;

        Ok(ScheduleEntry {
            id: row.try_get("id")?,
            activity_id: row.try_get("activity_id")?,
            scheduled_at: row.try_get("scheduled_at")?,
            status: row.try_get("status")?,
            retry_count,
            next_retry_at: row.try_get("next_retry_at")?,
            payload,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ScheduleEntryRepository for SqliteScheduleEntryRepository {
    #[instrument(skip(self, entry), fields(activity_id = entry.activity_id))]
    async fn create(&self, entry: &ScheduleEntry) -> SchedulerResult<ScheduleEntry> {
        let payload = serde_json::to_string(&entry.payload)?;
        let row = insert_statement(entry, payload)
            .fetch_one(&self.pool)
            .await?;

        let mut created = entry.clone();
        created.id = row.try_get("id")?;
        debug!("创建调度条目成功: ID {}", created.id);
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduleEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM schedule_entries WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    #[instrument(skip(self, entry), fields(entry_id = entry.id, status = %entry.status))]
    async fn update(&self, entry: &ScheduleEntry) -> SchedulerResult<()> {
        let payload = serde_json::to_string(&entry.payload)?;
        let result = update_statement(entry, payload)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::entry_not_found(entry.id));
        }

        debug!("更新调度条目成功: ID {}", entry.id);
        Ok(())
    }

    #[instrument(skip(self, completed, next), fields(entry_id = completed.id))]
    async fn complete_with_next(
        &self,
        completed: &ScheduleEntry,
        next: Option<&ScheduleEntry>,
    ) -> SchedulerResult<Option<ScheduleEntry>> {
        let completed_payload = serde_json::to_string(&completed.payload)?;
        let next_payload = next
            .map(|n| serde_json::to_string(&n.payload))
            .transpose()?;

        // 事务未提交就被丢弃时自动回滚
        let mut tx = self.pool.begin().await?;

        let result = update_statement(completed, completed_payload)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::entry_not_found(completed.id));
        }

        let created = match (next, next_payload) {
            (Some(next), Some(payload)) => {
                let row = insert_statement(next, payload).fetch_one(&mut *tx).await?;
                let mut created = next.clone();
                created.id = row.try_get("id")?;
                Some(created)
            }
            _ => None,
        };

        tx.commit().await?;
        debug!(
            "调度条目 {} 已完成，后续条目: {:?}",
            completed.id,
            created.as_ref().map(|c| c.id)
        );
        Ok(created)
    }

    #[instrument(skip(self, entry), fields(entry_id = entry.id, expected = %expected))]
    async fn update_if_status(
        &self,
        entry: &ScheduleEntry,
        expected: ScheduleStatus,
    ) -> SchedulerResult<bool> {
        let payload = serde_json::to_string(&entry.payload)?;
        let result = sqlx::query(
            r#"
            UPDATE schedule_entries
            SET scheduled_at = ?, status = ?, retry_count = ?, next_retry_at = ?, payload = ?,
                result = ?, error_message = ?, started_at = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
              AND (status != 'FAILED' OR next_retry_at IS NOT NULL)
            "#,
        )
        .bind(entry.scheduled_at)
        .bind(entry.status)
        .bind(i64::from(entry.retry_count))
        .bind(entry.next_retry_at)
        .bind(payload)
        .bind(&entry.result)
        .bind(&entry.error_message)
        .bind(entry.started_at)
        .bind(entry.completed_at)
        .bind(entry.updated_at)
        .bind(entry.id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM schedule_entries WHERE id = ?")
            .bind(entry.id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
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
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS},
                   CASE status WHEN 'PENDING' THEN scheduled_at ELSE next_retry_at END AS due_at
            FROM schedule_entries
            WHERE (status = 'PENDING' AND scheduled_at <= ?)
               OR (status = 'FAILED' AND next_retry_at IS NOT NULL AND next_retry_at <= ?)
            ORDER BY due_at ASC, id ASC
            LIMIT ?
            "#
        ))
        .bind(now)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    #[instrument(skip(self))]
    async fn get_stale_executing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM schedule_entries
            WHERE status = 'EXECUTING' AND started_at IS NOT NULL AND started_at <= ?
            ORDER BY started_at ASC, id ASC
            LIMIT ?
            "#
        ))
        .bind(started_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        status: Option<ScheduleStatus>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduleEntry>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM schedule_entries WHERE status = ?
                     ORDER BY scheduled_at ASC, id ASC LIMIT ?"
                ))
                .bind(status)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM schedule_entries
                     ORDER BY scheduled_at ASC, id ASC LIMIT ?"
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::row_to_entry).collect()
    }

    #[instrument(skip(self))]
    async fn count_by_status(&self) -> SchedulerResult<StatusCounts> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM schedule_entries GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: ScheduleStatus = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.add(status, count.max(0) as usize);
        }
        Ok(counts)
    }
}
