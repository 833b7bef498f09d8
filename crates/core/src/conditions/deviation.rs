//! Value-deviation trigger.
//!
//! The trigger signal is the *maximum* deviation over every observation
//! contributing to the feed, not the deviation of their median.

use super::ConditionCheck;
use crate::config::FallbackConfig;
use alloy::primitives::U256;
use relayer_api::SignedPackageSet;
use serde_json::{json, Map, Value};
use tracing::warn;

/// Result of one deviation check against one package set.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviationCheck {
    pub should_update: bool,
    /// Largest deviation observed, in percent
    pub max_deviation: f64,
    /// `max_deviation / threshold`
    pub max_deviation_ratio: f64,
    pub message: String,
}

/// `|observed - base| / base * 100`.
///
/// A zero base deviates infinitely from any non-zero observation and not at
/// all from zero.
pub fn calculate_deviation_percent(observed: f64, base: f64) -> f64 {
    if base == 0.0 {
        return if observed == 0.0 { 0.0 } else { f64::MAX };
    }
    ((observed - base) / base).abs() * 100.0
}

fn u256_to_f64(value: U256) -> f64 {
    match u128::try_from(value) {
        Ok(v) => v as f64,
        Err(_) => value.to_string().parse().unwrap_or(f64::MAX),
    }
}

/// Stored contract value expressed with `decimals` decimals.
pub fn contract_value_as_decimal(value: U256, decimals: u8) -> f64 {
    u256_to_f64(value) / 10f64.powi(decimals as i32)
}

/// Warn about packages that would corrupt the aggregated value for `feed_id`.
///
/// Overlapping package groupings or a signer contributing twice are logged and
/// returned; they never block the update.
pub fn check_package_disjointness(feed_id: &str, packages: &SignedPackageSet) -> Vec<String> {
    let mut warnings = Vec::new();

    let package_ids = packages.package_ids_for(feed_id);
    if package_ids.len() > 1 {
        let msg = format!(
            "Feed {} is served by more than one data package id: {:?}",
            feed_id, package_ids
        );
        warn!(feed_id = feed_id, package_ids = ?package_ids, "Overlapping data packages");
        warnings.push(msg);
    }

    let duplicates = packages.duplicate_signers_for(feed_id);
    if !duplicates.is_empty() {
        let msg = format!(
            "Feed {} has more than one package from signer(s) {:?}",
            feed_id, duplicates
        );
        warn!(feed_id = feed_id, signers = ?duplicates, "Duplicate signers in data packages");
        warnings.push(msg);
    }

    warnings
}

/// Compare every observation for `feed_id` in `packages` with the stored value.
pub fn check_value_deviation(
    feed_id: &str,
    packages: &SignedPackageSet,
    value_from_contract: U256,
    threshold_percentage: f64,
) -> DeviationCheck {
    let feed_packages = packages.get(feed_id).unwrap_or_default();

    let mut max_deviation = 0f64;
    let mut values_from_node = Vec::new();
    let mut value_from_contract_dec = None;
    let mut timestamp = None;

    for package in feed_packages {
        for point in package.points_for(feed_id) {
            let contract_value = contract_value_as_decimal(value_from_contract, point.decimals());
            value_from_contract_dec.get_or_insert(contract_value);
            timestamp.get_or_insert(package.timestamp_milliseconds);
            values_from_node.push(point.value);

            max_deviation = max_deviation.max(calculate_deviation_percent(point.value, contract_value));
        }
    }

    let should_update = !values_from_node.is_empty() && max_deviation >= threshold_percentage;
    let max_deviation_ratio = if threshold_percentage > 0.0 {
        max_deviation / threshold_percentage
    } else {
        f64::MAX
    };

    let mut trace = Map::new();
    if let Some(value_from_contract) = value_from_contract_dec {
        trace.insert(
            feed_id.to_string(),
            json!({
                "valueFromContract": value_from_contract,
                "valuesFromNode": values_from_node,
                "timestamp": timestamp,
                "packagesCount": feed_packages.len(),
            }),
        );
    }
    trace.insert("maxDeviation".into(), json!(format!("{:.4}", max_deviation)));
    trace.insert(
        "thresholdDeviation".into(),
        json!(format!("{:.4}", threshold_percentage)),
    );
    let trace = Value::Object(trace);

    let message = if should_update {
        format!("Value has deviated enough to be updated. {}", trace)
    } else {
        format!("Value has not deviated enough to be updated. {}", trace)
    };

    DeviationCheck {
        should_update,
        max_deviation,
        max_deviation_ratio,
        message,
    }
}

/// Whether the historical packages must be consulted for this check.
pub fn needs_historical_check(latest: &DeviationCheck, fallback: &FallbackConfig) -> bool {
    fallback.is_active() && (latest.should_update || fallback.not_lazy)
}

/// Merge the latest and (in fallback mode) historical checks into one outcome.
///
/// In fallback mode both checks have to fire. With
/// `skip_deviation_based_frequent_updates` a firing result is still suppressed
/// while the last update is younger than the fallback offset.
pub fn combine_deviation_checks(
    latest: DeviationCheck,
    historical: Option<DeviationCheck>,
    fallback: &FallbackConfig,
    last_update_timestamp_ms: u64,
    now_ms: u64,
) -> ConditionCheck {
    let is_fallback = fallback.is_active();

    let (historical_fires, historical_ratio, historical_message) = match &historical {
        Some(h) => (
            h.should_update,
            h.max_deviation_ratio,
            format!(" AND Historical {}", h.message),
        ),
        None => (true, 0.0, String::new()),
    };

    let fires = latest.should_update && historical_fires;
    let skip_frequent = is_fallback
        && fallback.skip_deviation_based_frequent_updates
        && now_ms.saturating_sub(last_update_timestamp_ms) < fallback.offset_ms;

    let skip_message = if fires && skip_frequent {
        format!(
            "Update skipped: less than {} milliseconds passed since last update. ",
            fallback.offset_ms
        )
    } else {
        String::new()
    };
    let prefix = if is_fallback {
        "Deviation in fallback mode: "
    } else {
        ""
    };

    ConditionCheck {
        should_update: fires && !skip_frequent,
        messages: vec![format!(
            "{}{}{}{}",
            prefix, skip_message, latest.message, historical_message
        )],
        max_deviation_ratio: Some(latest.max_deviation_ratio.max(historical_ratio)),
    }
}
