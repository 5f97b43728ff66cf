use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 轮询调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    pub max_concurrent_tasks: usize,
    pub max_attempts: u32,
    pub retry_base_seconds: u64,
    pub backoff_multiplier: f64,
    pub poll_batch_size: usize,
    pub execution_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 30,
            max_concurrent_tasks: 5,
            max_attempts: 3,
            retry_base_seconds: 60,
            backoff_multiplier: 2.0,
            poll_batch_size: 100,
            execution_timeout_seconds: 300,
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.poll_interval_seconds,
            "scheduler.poll_interval_seconds",
        )?;
        ValidationUtils::validate_count(
            self.max_concurrent_tasks,
            "scheduler.max_concurrent_tasks",
        )?;
        ValidationUtils::validate_count(self.max_attempts as usize, "scheduler.max_attempts")?;
        ValidationUtils::validate_timeout_seconds(
            self.retry_base_seconds,
            "scheduler.retry_base_seconds",
        )?;
        ValidationUtils::validate_multiplier(
            self.backoff_multiplier,
            "scheduler.backoff_multiplier",
        )?;
        ValidationUtils::validate_count(self.poll_batch_size, "scheduler.poll_batch_size")?;
        ValidationUtils::validate_timeout_seconds(
            self.execution_timeout_seconds,
            "scheduler.execution_timeout_seconds",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_base_seconds, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_config_validation() {
        let config = SchedulerConfig {
            max_concurrent_tasks: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            backoff_multiplier: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            poll_interval_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
