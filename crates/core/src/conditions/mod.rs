//! Update condition evaluators.
//!
//! Every evaluator is a pure function of the feed's trigger, its contract
//! snapshot and the iteration's packages. None of them fail on missing data;
//! absence is reported as a non-firing check with a message.

mod deviation;
mod schedule;
mod time;

pub use deviation::{
    calculate_deviation_percent, check_package_disjointness, check_value_deviation,
    combine_deviation_checks, contract_value_as_decimal, needs_historical_check, DeviationCheck,
};
pub use schedule::{check_cron_condition, CronSchedule};
pub use time::check_time_condition;

use std::fmt;

/// Kind of update trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    Time,
    Cron,
    ValueDeviation,
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time => f.write_str("time"),
            Self::Cron => f.write_str("cron"),
            Self::ValueDeviation => f.write_str("value-deviation"),
        }
    }
}

/// Outcome of one evaluator for one feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionCheck {
    pub should_update: bool,
    pub messages: Vec<String>,
    /// Observed deviation divided by the threshold (deviation evaluator only)
    pub max_deviation_ratio: Option<f64>,
}

impl ConditionCheck {
    pub fn fired(message: impl Into<String>) -> Self {
        Self {
            should_update: true,
            messages: vec![message.into()],
            max_deviation_ratio: None,
        }
    }

    pub fn idle(message: impl Into<String>) -> Self {
        Self {
            should_update: false,
            messages: vec![message.into()],
            max_deviation_ratio: None,
        }
    }
}
