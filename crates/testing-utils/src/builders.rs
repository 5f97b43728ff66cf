//! Test data builders for creating test entities
//!
//! Builders start from sensible defaults so a test only spells out the
//! fields it cares about.

use chrono::{DateTime, Utc};
use courier_domain::{
    Activity, Courier, CourierLevel, CourierStatus, RecurrencePattern, ScheduleEntry,
    ScheduleStatus, TaskPayload, ZoneCode,
};

/// Builder for creating test Courier entities
pub struct CourierBuilder {
    courier: Courier,
}

impl CourierBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            courier: Courier {
                id: 0,
                user_id: "courier_user".to_string(),
                level: CourierLevel::City,
                parent_id: None,
                zone_code: ZoneCode::parse("BJ").unwrap(),
                status: CourierStatus::Active,
                jurisdiction: "BJ".to_string(),
                created_by: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.courier.id = id;
        self
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.courier.user_id = user_id.to_string();
        self
    }

    pub fn with_level(mut self, level: CourierLevel) -> Self {
        self.courier.level = level;
        self
    }

    pub fn with_parent(mut self, parent_id: i64) -> Self {
        self.courier.parent_id = Some(parent_id);
        self.courier.created_by = Some(parent_id);
        self
    }

    pub fn with_zone(mut self, zone: &str) -> Self {
        self.courier.zone_code = ZoneCode::parse(zone).unwrap();
        self
    }

    pub fn with_status(mut self, status: CourierStatus) -> Self {
        self.courier.status = status;
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: &str) -> Self {
        self.courier.jurisdiction = jurisdiction.to_string();
        self
    }

    pub fn build(self) -> Courier {
        self.courier
    }
}

impl Default for CourierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Activity entities
pub struct ActivityBuilder {
    activity: Activity,
}

impl ActivityBuilder {
    pub fn new() -> Self {
        Self {
            activity: Activity::new("test_activity", Utc::now()),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.activity.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.activity.name = name.to_string();
        self
    }

    pub fn with_recurrence(mut self, pattern: RecurrencePattern, interval: u32) -> Self {
        self.activity.recurrence = Some(pattern);
        self.activity.interval = interval;
        self
    }

    pub fn with_end_at(mut self, end_at: DateTime<Utc>) -> Self {
        self.activity.end_at = Some(end_at);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.activity.created_at = created_at;
        self
    }

    pub fn build(self) -> Activity {
        self.activity
    }
}

impl Default for ActivityBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test ScheduleEntry entities
pub struct ScheduleEntryBuilder {
    entry: ScheduleEntry,
}

impl ScheduleEntryBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            entry: ScheduleEntry::new(1, now, crate::helpers::custom_payload("test"), now),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.entry.id = id;
        self
    }

    pub fn with_activity_id(mut self, activity_id: i64) -> Self {
        self.entry.activity_id = activity_id;
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.entry.scheduled_at = scheduled_at;
        self
    }

    pub fn with_payload(mut self, payload: TaskPayload) -> Self {
        self.entry.payload = payload;
        self
    }

    pub fn with_status(mut self, status: ScheduleStatus) -> Self {
        self.entry.status = status;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.entry.retry_count = retry_count;
        self
    }

    pub fn with_next_retry_at(mut self, next_retry_at: DateTime<Utc>) -> Self {
        self.entry.next_retry_at = Some(next_retry_at);
        self
    }

    pub fn build(self) -> ScheduleEntry {
        self.entry
    }
}

impl Default for ScheduleEntryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
