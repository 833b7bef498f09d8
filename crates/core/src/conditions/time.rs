use super::ConditionCheck;

/// Heartbeat check: fires once `heartbeat_ms` has elapsed since the last
/// on-chain update. In fallback mode the fallback offset is added on top.
///
/// A zero heartbeat always fires.
pub fn check_time_condition(
    heartbeat_ms: u64,
    last_block_timestamp_ms: u64,
    now_ms: u64,
    fallback_offset_ms: u64,
) -> ConditionCheck {
    let elapsed = now_ms.saturating_sub(last_block_timestamp_ms);
    let required = heartbeat_ms.saturating_add(fallback_offset_ms);
    let prefix = if fallback_offset_ms > 0 {
        "Fallback time condition: "
    } else {
        ""
    };

    if elapsed >= required {
        ConditionCheck::fired(format!(
            "{}Enough time passed to update prices (heartbeat {} ms, {} ms since last update)",
            prefix, heartbeat_ms, elapsed
        ))
    } else {
        ConditionCheck::idle(format!(
            "{}Not enough time has passed to update prices (heartbeat {} ms, {} ms since last update)",
            prefix, heartbeat_ms, elapsed
        ))
    }
}
