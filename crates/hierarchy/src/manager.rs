use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use courier_domain::{
    AssignZoneRequest, Clock, Courier, CourierLevel, CourierRepository, CourierStatus,
    CreateSubordinateRequest, RegisterRootRequest, SystemClock, TransferSubordinateRequest,
    ZoneCode,
};
use courier_errors::{SchedulerError, SchedulerResult};
use courier_infrastructure::StructuredLogger;

/// 祖先链最多包含的信使数（含自身），等于层级数
const MAX_CHAIN_LEN: usize = 4;

/// 信使层级管理器
///
/// 只保存上级ID，不持有上级对象；祖先查询沿 `parent_id` 向上最多走4步。
/// 写操作共用一把互斥锁，读操作不加锁。
pub struct HierarchyManager {
    courier_repo: Arc<dyn CourierRepository>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl HierarchyManager {
    pub fn new(courier_repo: Arc<dyn CourierRepository>) -> Self {
        Self {
            courier_repo,
            clock: Arc::new(SystemClock),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 创建城市级根信使，由外部协作方在初始化时调用
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn register_root(&self, request: RegisterRootRequest) -> SchedulerResult<Courier> {
        let user_id = Self::validate_user_id(&request.user_id)?;
        let zone_code = ZoneCode::parse(&request.zone_code)?;
        let jurisdiction = request.jurisdiction.trim();
        if jurisdiction.is_empty() {
            return Err(SchedulerError::invalid_request("管辖范围不能为空"));
        }

        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let courier = Courier {
            id: 0,
            user_id,
            level: CourierLevel::TOP,
            parent_id: None,
            zone_code,
            status: CourierStatus::Active,
            jurisdiction: jurisdiction.to_string(),
            created_by: None,
            created_at: now,
            updated_at: now,
        };

        let created = self.courier_repo.create(&courier).await?;
        info!("创建城市级信使 {} (ID {})", created.user_id, created.id);
        Ok(created)
    }

    /// 上级为自己创建直属下级，层级为上级层级减一
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_subordinate(
        &self,
        manager_id: i64,
        request: CreateSubordinateRequest,
    ) -> SchedulerResult<Courier> {
        let user_id = Self::validate_user_id(&request.user_id)?;

        let _guard = self.write_lock.lock().await;
        let manager = self.load(manager_id).await?;
        Self::ensure_active(&manager)?;

        let level = manager.level.below().ok_or_else(|| {
            SchedulerError::InvalidLevel(format!(
                "{}级信使 {} 不能再创建下级",
                manager.level.name(),
                manager.id
            ))
        })?;

        let zone_code = match request.zone_code.as_deref() {
            Some(code) => ZoneCode::parse(code)?,
            None => manager.zone_code.clone(),
        };
        Self::ensure_within(&manager, &zone_code)?;

        let jurisdiction = request
            .jurisdiction
            .map(|j| j.trim().to_string())
            .filter(|j| !j.is_empty())
            .unwrap_or_else(|| manager.jurisdiction.clone());

        let now = self.clock.now();
        let courier = Courier {
            id: 0,
            user_id,
            level,
            parent_id: Some(manager.id),
            zone_code,
            status: CourierStatus::Active,
            jurisdiction,
            created_by: Some(manager.id),
            created_at: now,
            updated_at: now,
        };
        courier.check_parent(&manager)?;

        let created = self.courier_repo.create(&courier).await?;
        StructuredLogger::log_hierarchy_change(
            "create_subordinate",
            created.id,
            manager.id,
            &format!("{}级信使，区域 {}", created.level.name(), created.zone_code),
        );
        Ok(created)
    }

    /// 直属下级（不递归），按ID升序
    pub async fn get_subordinates(&self, manager_id: i64) -> SchedulerResult<Vec<Courier>> {
        let manager = self.load(manager_id).await?;
        let children = self.courier_repo.get_children(manager.id).await?;
        debug!("信使 {} 共有 {} 名直属下级", manager.id, children.len());
        Ok(children)
    }

    /// 修改（可能是间接的）下级的区域
    ///
    /// 新区域必须同时落在操作者区域和该信使直属上级区域内，
    /// 且该信使所有直属下级仍在新区域内。任何校验失败都不会写入。
    #[instrument(skip(self, request), fields(zone = %request.zone_code))]
    pub async fn assign_zone(
        &self,
        manager_id: i64,
        courier_id: i64,
        request: AssignZoneRequest,
    ) -> SchedulerResult<Courier> {
        let zone_code = ZoneCode::parse(&request.zone_code)?;

        let _guard = self.write_lock.lock().await;
        let manager = self.load(manager_id).await?;
        Self::ensure_active(&manager)?;
        let mut courier = self.load(courier_id).await?;

        let chain = self.ancestor_chain(&courier).await?;
        Self::ensure_managed_by(&chain, &manager)?;
        Self::ensure_within(&manager, &zone_code)?;

        // 受管信使一定不是根，直属上级在祖先链第二位
        if let Some(parent) = chain.get(1) {
            if !parent.zone_code.contains(&zone_code) {
                return Err(SchedulerError::invalid_zone(format!(
                    "区域 {} 不在直属上级 {} 的区域 {} 范围内",
                    zone_code, parent.id, parent.zone_code
                )));
            }
        }

        let children = self.courier_repo.get_children(courier.id).await?;
        if let Some(outside) = children.iter().find(|c| !zone_code.contains(&c.zone_code)) {
            return Err(SchedulerError::invalid_zone(format!(
                "下级信使 {} 的区域 {} 不在新区域 {} 范围内",
                outside.id, outside.zone_code, zone_code
            )));
        }

        let previous = std::mem::replace(&mut courier.zone_code, zone_code);
        courier.updated_at = self.clock.now();
        self.courier_repo.update(&courier).await?;

        StructuredLogger::log_hierarchy_change(
            "assign_zone",
            courier.id,
            manager.id,
            &format!("{} -> {}", previous, courier.zone_code),
        );
        Ok(courier)
    }

    /// 把直属下级转交给同级的另一名上级
    #[instrument(skip(self, request), fields(new_manager_id = request.new_manager_id))]
    pub async fn transfer_subordinate(
        &self,
        manager_id: i64,
        courier_id: i64,
        request: TransferSubordinateRequest,
    ) -> SchedulerResult<Courier> {
        let _guard = self.write_lock.lock().await;
        let manager = self.load(manager_id).await?;
        Self::ensure_active(&manager)?;
        let mut courier = self.load(courier_id).await?;

        if courier.parent_id != Some(manager.id) {
            return Err(SchedulerError::permission_denied(format!(
                "信使 {} 不是信使 {} 的直属下级",
                courier.id, manager.id
            )));
        }
        if request.new_manager_id == manager.id {
            return Err(SchedulerError::invalid_request("新上级与当前上级相同"));
        }

        let new_manager = self.load(request.new_manager_id).await?;
        if new_manager.level != manager.level {
            return Err(SchedulerError::LevelMismatch {
                expected: manager.level.value(),
                actual: new_manager.level.value(),
            });
        }
        if !new_manager.is_active() {
            return Err(SchedulerError::permission_denied(format!(
                "目标上级 {} 当前状态为 {}，不能接收下级",
                new_manager.id,
                new_manager.status.as_str()
            )));
        }

        // 祖先链逐级校验层级，同级的新上级链中只有同级及更高层级的信使，
        // 下级不会出现在其中；链校验放宽时这里仍然拦住环
        let new_chain = self.ancestor_chain(&new_manager).await?;
        if new_chain.iter().any(|c| c.id == courier.id) {
            return Err(SchedulerError::HierarchyCycle {
                courier_id: courier.id,
                target_id: new_manager.id,
            });
        }

        if !new_manager.zone_code.contains(&courier.zone_code) {
            return Err(SchedulerError::invalid_zone(format!(
                "信使 {} 的区域 {} 不在新上级 {} 的区域 {} 范围内",
                courier.id, courier.zone_code, new_manager.id, new_manager.zone_code
            )));
        }

        courier.parent_id = Some(new_manager.id);
        courier.updated_at = self.clock.now();
        self.courier_repo.update(&courier).await?;

        let detail = match request.reason.as_deref() {
            Some(reason) => format!("{} -> {}，原因: {}", manager.id, new_manager.id, reason),
            None => format!("{} -> {}", manager.id, new_manager.id),
        };
        StructuredLogger::log_hierarchy_change(
            "transfer_subordinate",
            courier.id,
            manager.id,
            &detail,
        );
        Ok(courier)
    }

    /// 从信使本身到城市级根的完整祖先链
    pub async fn get_hierarchy(&self, courier_id: i64) -> SchedulerResult<Vec<Courier>> {
        let courier = self.load(courier_id).await?;
        self.ancestor_chain(&courier).await
    }

    /// 与 `get_hierarchy` 相同，但要求 `courier_id` 在 `manager_id` 的管理范围内
    pub async fn get_subordinate_detail(
        &self,
        manager_id: i64,
        courier_id: i64,
    ) -> SchedulerResult<Vec<Courier>> {
        let manager = self.load(manager_id).await?;
        let courier = self.load(courier_id).await?;
        let chain = self.ancestor_chain(&courier).await?;
        Self::ensure_managed_by(&chain, &manager)?;
        Ok(chain)
    }

    async fn load(&self, id: i64) -> SchedulerResult<Courier> {
        self.courier_repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| SchedulerError::courier_not_found(id))
    }

    /// 沿 `parent_id` 向上收集祖先，首元素为自身，末元素为城市级根。
    /// 层级必须逐级加一，且必须在4步内到达根，否则视为数据损坏。
    async fn ancestor_chain(&self, courier: &Courier) -> SchedulerResult<Vec<Courier>> {
        let mut chain = vec![courier.clone()];
        loop {
            let current = &chain[chain.len() - 1];
            let Some(expected_level) = current.level.above() else {
                if let Some(parent_id) = current.parent_id {
                    return Err(SchedulerError::HierarchyCorrupted(format!(
                        "城市级信使 {} 存在上级 {}",
                        current.id, parent_id
                    )));
                }
                return Ok(chain);
            };

            if chain.len() >= MAX_CHAIN_LEN {
                return Err(SchedulerError::HierarchyCorrupted(format!(
                    "信使 {} 在 {} 步内未到达城市级",
                    courier.id, MAX_CHAIN_LEN
                )));
            }

            let parent_id = current.parent_id.ok_or_else(|| {
                SchedulerError::HierarchyCorrupted(format!(
                    "{}级信使 {} 缺少上级",
                    current.level.name(),
                    current.id
                ))
            })?;
            let parent = self.courier_repo.get_by_id(parent_id).await?.ok_or_else(|| {
                SchedulerError::HierarchyCorrupted(format!(
                    "信使 {} 的上级 {} 不存在",
                    current.id, parent_id
                ))
            })?;

            if parent.level != expected_level {
                warn!(
                    "层级异常: 信使 {} ({}级) 的上级 {} 为 {}级",
                    current.id,
                    current.level.value(),
                    parent.id,
                    parent.level.value()
                );
                return Err(SchedulerError::HierarchyCorrupted(format!(
                    "信使 {} 的上级 {} 层级为 {}，期望 {}",
                    current.id,
                    parent.id,
                    parent.level.value(),
                    expected_level.value()
                )));
            }
            chain.push(parent);
        }
    }

    fn ensure_managed_by(chain: &[Courier], manager: &Courier) -> SchedulerResult<()> {
        if chain.iter().skip(1).any(|c| c.id == manager.id) {
            return Ok(());
        }
        let courier_id = chain.first().map(|c| c.id).unwrap_or_default();
        Err(SchedulerError::permission_denied(format!(
            "信使 {} 不在信使 {} 的管理范围内",
            courier_id, manager.id
        )))
    }

    fn ensure_active(manager: &Courier) -> SchedulerResult<()> {
        if manager.is_active() {
            return Ok(());
        }
        Err(SchedulerError::permission_denied(format!(
            "信使 {} 当前状态为 {}，不能管理下级",
            manager.id,
            manager.status.as_str()
        )))
    }

    fn ensure_within(manager: &Courier, zone_code: &ZoneCode) -> SchedulerResult<()> {
        if manager.zone_code.contains(zone_code) {
            return Ok(());
        }
        Err(SchedulerError::invalid_zone(format!(
            "区域 {} 超出信使 {} 的管辖区域 {}",
            zone_code, manager.id, manager.zone_code
        )))
    }

    fn validate_user_id(user_id: &str) -> SchedulerResult<String> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(SchedulerError::invalid_request("用户ID不能为空"));
        }
        Ok(user_id.to_string())
    }
}
