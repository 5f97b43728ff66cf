//! 重复活动的下一次执行时间计算
//!
//! 分钟/小时/天/周按固定时长相加；月/年按日历相加，
//! 目标月份没有对应日期时取该月最后一天（1月31日 + 1个月 = 2月28/29日）。

use chrono::{DateTime, Duration, Months, Utc};

use courier_domain::RecurrencePattern;
use courier_errors::{SchedulerError, SchedulerResult};

/// 日历周期追赶时的最大步数
const MAX_CALENDAR_STEPS: u32 = 10_000;

pub struct RecurrencePlanner;

impl RecurrencePlanner {
    /// 从 `last` 推进一个周期。纯函数，不考虑当前时间和结束时间。
    pub fn compute_next(
        last: DateTime<Utc>,
        pattern: RecurrencePattern,
        interval: u32,
    ) -> SchedulerResult<DateTime<Utc>> {
        if interval == 0 {
            return Err(SchedulerError::invalid_request("重复间隔必须大于0"));
        }

        let next = match Self::fixed_step(pattern, interval)? {
            Some(step) => last.checked_add_signed(step),
            None => Self::calendar_months(pattern, interval)
                .and_then(|months| last.checked_add_months(months)),
        };

        next.ok_or_else(|| Self::out_of_range(last, pattern, interval))
    }

    /// 以 `last` 为锚点，返回严格晚于 `now` 的第一个周期点；
    /// 错过的周期直接跳过，不补执行。超过 `end_at` 时返回 `None`。
    pub fn next_after(
        last: DateTime<Utc>,
        pattern: RecurrencePattern,
        interval: u32,
        now: DateTime<Utc>,
        end_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let mut next = Self::compute_next(last, pattern, interval)?;

        if next <= now {
            match Self::fixed_step(pattern, interval)? {
                Some(step) => {
                    let step_ms = step.num_milliseconds();
                    let behind_ms = (now - next).num_milliseconds();
                    let jump = behind_ms
                        .checked_div(step_ms)
                        .and_then(|periods| periods.checked_add(1))
                        .and_then(|periods| periods.checked_mul(step_ms))
                        .and_then(Duration::try_milliseconds)
                        .ok_or_else(|| Self::out_of_range(last, pattern, interval))?;
                    next = next
                        .checked_add_signed(jump)
                        .ok_or_else(|| Self::out_of_range(last, pattern, interval))?;
                }
                None => {
                    let mut steps = 0;
                    while next <= now {
                        if steps >= MAX_CALENDAR_STEPS {
                            return Err(SchedulerError::Internal(format!(
                                "追赶重复周期超过 {MAX_CALENDAR_STEPS} 步: {pattern}/{interval}"
                            )));
                        }
                        next = Self::compute_next(next, pattern, interval)?;
                        steps += 1;
                    }
                }
            }
        }

        if end_at.is_some_and(|end| next > end) {
            return Ok(None);
        }
        Ok(Some(next))
    }

    fn fixed_step(pattern: RecurrencePattern, interval: u32) -> SchedulerResult<Option<Duration>> {
        let interval = i64::from(interval);
        let step = match pattern {
            RecurrencePattern::Minutely => Duration::try_minutes(interval),
            RecurrencePattern::Hourly => Duration::try_hours(interval),
            RecurrencePattern::Daily => Duration::try_days(interval),
            RecurrencePattern::Weekly => Duration::try_weeks(interval),
            RecurrencePattern::Monthly | RecurrencePattern::Yearly => return Ok(None),
        };
        step.map(Some).ok_or_else(|| {
            SchedulerError::invalid_request(format!("重复间隔过大: {pattern}/{interval}"))
        })
    }

    fn calendar_months(pattern: RecurrencePattern, interval: u32) -> Option<Months> {
        match pattern {
            RecurrencePattern::Monthly => Some(Months::new(interval)),
            RecurrencePattern::Yearly => interval.checked_mul(12).map(Months::new),
            _ => None,
        }
    }

    fn out_of_range(
        last: DateTime<Utc>,
        pattern: RecurrencePattern,
        interval: u32,
    ) -> SchedulerError {
        SchedulerError::invalid_request(format!(
            "下一次执行时间超出可表示范围: {last} + {pattern}/{interval}"
        ))
    }
}
