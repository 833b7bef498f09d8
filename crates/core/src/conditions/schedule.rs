//! Cron-scheduled updates.

use super::ConditionCheck;
use crate::error::{ConfigError, ConfigResult};
use chrono::{DateTime, Utc};
use std::str::FromStr;

/// Parsed cron expression.
///
/// Accepts the classic 5-field form (minute precision) as well as the 6/7-field
/// form with seconds and year.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: ::cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> ConfigResult<Self> {
        let fields = expression.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {}", expression.trim()),
            6 | 7 => expression.trim().to_string(),
            n => {
                return Err(ConfigError::InvalidCron {
                    expression: expression.to_string(),
                    reason: format!("expected 5 to 7 fields, got {}", n),
                })
            }
        };
        let schedule =
            ::cron::Schedule::from_str(&normalized).map_err(|e| ConfigError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Most recent scheduled time strictly before `at`.
    pub fn last_fire_before(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&at).rev().take(2).find(|t| *t < at)
    }

    /// First scheduled time strictly after `at`.
    pub fn next_fire_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&at).next()
    }
}

fn to_datetime(ms: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(i64::try_from(ms).unwrap_or(i64::MAX)).unwrap_or_default()
}

/// Fires when any schedule has a fire time after the last on-chain update.
///
/// Schedules are evaluated at `now - fallback_offset_ms` so that a delayed
/// fallback relayer still sees the slot the main relayer should have served.
pub fn check_cron_condition(
    schedules: &[CronSchedule],
    last_block_timestamp_ms: u64,
    now_ms: u64,
    fallback_offset_ms: u64,
) -> ConditionCheck {
    let at = to_datetime(now_ms.saturating_sub(fallback_offset_ms));
    let last_update = to_datetime(last_block_timestamp_ms);

    let mut check = ConditionCheck::default();
    for schedule in schedules {
        let last = schedule.last_fire_before(at);
        let next = schedule
            .next_fire_after(at)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".into());

        match last {
            Some(last) if last > last_update => {
                check.should_update = true;
                check.messages.push(format!(
                    "Cron '{}': scheduled update at {} is due (last update at {}, next at {})",
                    schedule.expression(),
                    last.to_rfc3339(),
                    last_update.to_rfc3339(),
                    next
                ));
            }
            _ => check.messages.push(format!(
                "Cron '{}': no scheduled update due since {} (next at {})",
                schedule.expression(),
                last_update.to_rfc3339(),
                next
            )),
        }
    }
    check
}
