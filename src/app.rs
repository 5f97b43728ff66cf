use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use courier_config::{AppConfig, DatabaseBackend};
use courier_dispatcher::{SchedulerSettings, TaskHandlerRegistry, TaskScheduler};
use courier_domain::{ActivityRepository, CourierRepository, ScheduleEntryRepository};
use courier_hierarchy::HierarchyManager;
use courier_infrastructure::{
    DatabaseManager, InMemoryActivityRepository, InMemoryCourierRepository,
    InMemoryScheduleEntryRepository, MetricsCollector, SqliteActivityRepository,
    SqliteCourierRepository, SqliteScheduleEntryRepository,
};

use crate::handlers::register_builtin_handlers;

/// 按配置选择的一组仓储实现
struct Stores {
    couriers: Arc<dyn CourierRepository>,
    activities: Arc<dyn ActivityRepository>,
    entries: Arc<dyn ScheduleEntryRepository>,
    database: Option<DatabaseManager>,
}

/// 主应用程序，负责组装层级管理器和调度器
pub struct Application {
    config: AppConfig,
    hierarchy: Arc<HierarchyManager>,
    scheduler: Arc<TaskScheduler>,
    database: Option<DatabaseManager>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序，存储后端: {:?}", config.database.backend);

        let stores = create_stores(&config).await?;

        let registry = TaskHandlerRegistry::new();
        register_builtin_handlers(&registry).await;

        let settings = SchedulerSettings::from(&config.scheduler);
        let scheduler = Arc::new(
            TaskScheduler::new(stores.entries, stores.activities, registry, settings)
                .with_metrics(Arc::new(MetricsCollector::new())),
        );
        let hierarchy = Arc::new(HierarchyManager::new(stores.couriers));

        Ok(Self {
            config,
            hierarchy,
            scheduler,
            database: stores.database,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn hierarchy(&self) -> Arc<HierarchyManager> {
        Arc::clone(&self.hierarchy)
    }

    pub fn scheduler(&self) -> Arc<TaskScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// 启动调度器并等待关闭信号；收到信号后停止轮询并关闭数据库
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let scheduler_started = if self.config.scheduler.enabled {
            self.scheduler.start().await.context("启动调度器失败")?;
            true
        } else {
            warn!("调度器已在配置中禁用，仅提供层级管理");
            false
        };

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        if scheduler_started {
            if let Err(e) = self.scheduler.stop().await {
                error!("停止调度器失败: {e}");
            }
        }

        if let Some(database) = &self.database {
            database.close().await;
        }

        info!("应用已停止");
        Ok(())
    }
}

async fn create_stores(config: &AppConfig) -> Result<Stores> {
    match config.database.backend {
        DatabaseBackend::Memory => {
            info!("使用内存存储");
            Ok(Stores {
                couriers: Arc::new(InMemoryCourierRepository::new()),
                activities: Arc::new(InMemoryActivityRepository::new()),
                entries: Arc::new(InMemoryScheduleEntryRepository::new()),
                database: None,
            })
        }
        DatabaseBackend::Sqlite => {
            let database = DatabaseManager::new(&config.database)
                .await
                .context("创建数据库连接池失败")?;
            database.migrate().await.context("数据库迁移失败")?;
            database
                .health_check()
                .await
                .context("数据库健康检查失败")?;

            let pool = database.pool().clone();
            Ok(Stores {
                couriers: Arc::new(SqliteCourierRepository::new(pool.clone())),
                activities: Arc::new(SqliteActivityRepository::new(pool.clone())),
                entries: Arc::new(SqliteScheduleEntryRepository::new(pool)),
                database: Some(database),
            })
        }
    }
}
