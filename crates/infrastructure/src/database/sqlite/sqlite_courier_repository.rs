use async_trait::async_trait;
use courier_domain::{Courier, CourierLevel, CourierRepository, CourierStatus, ZoneCode};
use courier_errors::{SchedulerError, SchedulerResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

const COURIER_COLUMNS: &str = "id, user_id, level, parent_id, zone_code, status, jurisdiction, \
                               created_by, created_at, updated_at";

pub struct SqliteCourierRepository {
    pool: SqlitePool,
}

impl SqliteCourierRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_courier(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<Courier> {
        let level: i64 = row.try_get("level")?;
        let level = u8::try_from(level)
            .map_err(|_| SchedulerError::InvalidLevel(format!("存储中的层级越界: {level}")))
            .and_then(CourierLevel::try_from)?;
        let zone_code: String = row.try_get("zone_code")?;
        let status: CourierStatus = row.try_get("status")?;

        Ok(Courier {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            level,
            parent_id: row.try_get("parent_id")?,
            zone_code: ZoneCode::parse(&zone_code)?,
            status,
            jurisdiction: row.try_get("jurisdiction")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl CourierRepository for SqliteCourierRepository {
    #[instrument(skip(self, courier), fields(user_id = %courier.user_id, level = courier.level.value()))]
    async fn create(&self, courier: &Courier) -> SchedulerResult<Courier> {
        let row = sqlx::query(
            r#"
            INSERT INTO couriers (user_id, level, parent_id, zone_code, status, jurisdiction,
                                  created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&courier.user_id)
        .bind(i64::from(courier.level.value()))
        .bind(courier.parent_id)
        .bind(courier.zone_code.as_str())
        .bind(courier.status)
        .bind(&courier.jurisdiction)
        .bind(courier.created_by)
        .bind(courier.created_at)
        .bind(courier.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SchedulerError::DuplicateCourier {
                    user_id: courier.user_id.clone(),
                }
            } else {
                SchedulerError::Database(e)
            }
        })?;

        let mut created = courier.clone();
        created.id = row.try_get("id")?;
        debug!("创建信使成功: ID {}", created.id);
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Courier>> {
        let row = sqlx::query(&format!(
            "SELECT {COURIER_COLUMNS} FROM couriers WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_courier).transpose()
    }

    #[instrument(skip(self))]
    async fn get_by_user_id(&self, user_id: &str) -> SchedulerResult<Option<Courier>> {
        let row = sqlx::query(&format!(
            "SELECT {COURIER_COLUMNS} FROM couriers WHERE user_id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_courier).transpose()
    }

    #[instrument(skip(self))]
    async fn get_children(&self, parent_id: i64) -> SchedulerResult<Vec<Courier>> {
        let rows = sqlx::query(&format!(
            "SELECT {COURIER_COLUMNS} FROM couriers WHERE parent_id = ? ORDER BY id ASC"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_courier).collect()
    }

    #[instrument(skip(self, courier), fields(courier_id = courier.id))]
    async fn update(&self, courier: &Courier) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE couriers
            SET level = ?, parent_id = ?, zone_code = ?, status = ?, jurisdiction = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(courier.level.value()))
        .bind(courier.parent_id)
        .bind(courier.zone_code.as_str())
        .bind(courier.status)
        .bind(&courier.jurisdiction)
        .bind(courier.updated_at)
        .bind(courier.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::courier_not_found(courier.id));
        }

        debug!("更新信使成功: ID {}", courier.id);
        Ok(())
    }
}
