use async_trait::async_trait;
use courier_domain::{Activity, ActivityRepository, RecurrencePattern};
use courier_errors::{SchedulerError, SchedulerResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteActivityRepository {
    pool: SqlitePool,
}

impl SqliteActivityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_activity(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<Activity> {
        let recurrence: Option<String> = row.try_get("recurrence")?;
        let recurrence = recurrence
            .as_deref()
            .map(str::parse::<RecurrencePattern>)
            .transpose()?;
        let interval: i64 = row.try_get("recurrence_interval")?;
        let interval = u32::try_from(interval).map_err(|_| {
            SchedulerError::DatabaseOperation(format!("存储中的重复间隔越界: {interval}"))
        })?;

        Ok(Activity {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            recurrence,
            interval,
            end_at: row.try_get("end_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ActivityRepository for SqliteActivityRepository {
    #[instrument(skip(self, activity), fields(name = %activity.name))]
    async fn create(&self, activity: &Activity) -> SchedulerResult<Activity> {
        let row = sqlx::query(
            r#"
            INSERT INTO activities (name, recurrence, recurrence_interval, end_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&activity.name)
        .bind(activity.recurrence.map(|p| p.as_str()))
        .bind(i64::from(activity.interval))
        .bind(activity.end_at)
        .bind(activity.created_at)
        .fetch_one(&self.pool)
        .await?;

        let mut created = activity.clone();
        created.id = row.try_get("id")?;
        debug!("创建活动成功: ID {}", created.id);
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Activity>> {
        let row = sqlx::query(
            "SELECT id, name, recurrence, recurrence_interval, end_at, created_at
             FROM activities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_activity).transpose()
    }
}
