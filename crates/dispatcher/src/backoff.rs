use std::time::Duration;

/// 指数退避：`delay = base * multiplier^(attempt - 1)`，不加随机抖动
///
/// 无状态，重试次数上限由调用方判断。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffCalculator {
    base: Duration,
    multiplier: f64,
}

impl BackoffCalculator {
    /// 延迟上限，溢出或非有限值都饱和到这里
    pub const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

    pub fn new(base: Duration, multiplier: f64) -> Self {
        Self { base, multiplier }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// 第 `attempt` 次失败后的等待时间；`attempt` 小于1按1处理
    pub fn next_delay(&self, attempt: u32) -> Duration {
        Self::delay_for(attempt, self.base, self.multiplier)
    }

    pub fn delay_for(attempt: u32, base: Duration, multiplier: f64) -> Duration {
        let exponent = i32::try_from(attempt.max(1) - 1).unwrap_or(i32::MAX);
        let seconds = base.as_secs_f64() * multiplier.powi(exponent);

        if !seconds.is_finite() || seconds >= Self::MAX_DELAY.as_secs_f64() {
            Self::MAX_DELAY
        } else if seconds <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(seconds)
        }
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), 2.0)
    }
}
