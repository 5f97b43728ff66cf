use serde::{Deserialize, Serialize};

/// 创建城市级（根）信使
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRootRequest {
    pub user_id: String,
    pub zone_code: String,
    pub jurisdiction: String,
}

/// 上级为自己创建直属下级；区域和管辖范围缺省时沿用上级
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSubordinateRequest {
    pub user_id: String,
    pub zone_code: Option<String>,
    pub jurisdiction: Option<String>,
}

impl CreateSubordinateRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_zone(mut self, zone_code: impl Into<String>) -> Self {
        self.zone_code = Some(zone_code.into());
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignZoneRequest {
    pub zone_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSubordinateRequest {
    pub new_manager_id: i64,
    pub reason: Option<String>,
}
