use crate::{ConfigError, ConfigResult};

/// 日志级别白名单，和 `tracing` 的级别一致
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

const MAX_SECONDS: u64 = 86_400;
const MAX_COUNT: usize = 10_000;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// Field-level checks shared by every config section
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// 秒数必须在 1..=86400 之间
    pub fn validate_timeout_seconds(seconds: u64, field_name: &str) -> ConfigResult<()> {
        if seconds == 0 || seconds > MAX_SECONDS {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be between 1 and {MAX_SECONDS} seconds, got {seconds}"
            )));
        }
        Ok(())
    }

    /// 数量必须在 1..=10000 之间
    pub fn validate_count(count: usize, field_name: &str) -> ConfigResult<()> {
        if count == 0 || count > MAX_COUNT {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be between 1 and {MAX_COUNT}, got {count}"
            )));
        }
        Ok(())
    }

    /// 退避倍数小于1会让重试间隔越来越短
    pub fn validate_multiplier(multiplier: f64, field_name: &str) -> ConfigResult<()> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be a finite number >= 1.0, got {multiplier}"
            )));
        }
        Ok(())
    }

    pub fn validate_log_level(level: &str, field_name: &str) -> ConfigResult<()> {
        if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "{field_name} has invalid level {level}, expected one of {LOG_LEVELS:?}"
            )));
        }
        Ok(())
    }

    pub fn validate_sqlite_url(url: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;
        if !url.starts_with("sqlite:") {
            return Err(ConfigError::Validation(format!(
                "{field_name} must start with sqlite:, got {url}"
            )));
        }
        Ok(())
    }
}
