//! Widening of a non-empty update set to amortize transaction overhead.
//!
//! Once some feed is going to be written anyway, other eligible feeds are
//! added when:
//! - their deviation is close to their threshold
//! - their heartbeat interval divides a heartbeat that fired this iteration
//! - they are delivered by a data package already being sent
//!
//! Only feeds that passed the freshness check are candidates, and applying
//! the augmentation twice adds nothing the first pass did not.

use crate::config::OptimizationConfig;
use crate::engine::UpdateDecision;
use relayer_api::{FeedId, SignedPackageSet};
use std::collections::HashSet;
use tracing::debug;

/// A feed that may be added by the augmentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub feed_id: FeedId,
    /// Effective heartbeat at evaluation time
    pub heartbeat_ms: Option<u64>,
}

impl Candidate {
    pub fn new(feed_id: impl Into<FeedId>, heartbeat_ms: Option<u64>) -> Self {
        Self {
            feed_id: feed_id.into(),
            heartbeat_ms,
        }
    }
}

/// Zero intervals synchronize with anything.
fn heartbeat_in_sync(candidate_ms: u64, fired_ms: u64) -> bool {
    candidate_ms == 0 || fired_ms % candidate_ms == 0
}

/// Add eligible feeds to a non-empty decision.
///
/// `candidates` lists every eligible feed in config order; the selection is
/// re-sorted into that order afterwards.
pub fn augment(
    decision: &mut UpdateDecision,
    candidates: &[Candidate],
    optimization: &OptimizationConfig,
    packages: &SignedPackageSet,
) {
    if decision.feeds_to_update.is_empty() {
        return;
    }

    let mut selected: HashSet<FeedId> = decision.feeds_to_update.iter().cloned().collect();
    let mut added = Vec::new();

    if let Some(threshold) = optimization.additional_updates_deviation_threshold {
        for candidate in candidates {
            if selected.contains(&candidate.feed_id) {
                continue;
            }
            let Some(ratio) = decision.deviation_ratios.get(&candidate.feed_id) else {
                continue;
            };
            if *ratio >= threshold {
                decision.messages.push(format!(
                    "Feed {} added for gas optimization: deviation ratio {:.4} >= {:.4}",
                    candidate.feed_id, ratio, threshold
                ));
                selected.insert(candidate.feed_id.clone());
                added.push(candidate.feed_id.clone());
            }
        }
    }

    if optimization.sync_heartbeats && !decision.heartbeat_updates.is_empty() {
        for candidate in candidates {
            if selected.contains(&candidate.feed_id) {
                continue;
            }
            let Some(heartbeat) = candidate.heartbeat_ms else {
                continue;
            };
            if let Some(fired) = decision
                .heartbeat_updates
                .iter()
                .find(|fired| heartbeat_in_sync(heartbeat, **fired))
            {
                decision.messages.push(format!(
                    "Feed {} added for gas optimization: heartbeat {} ms synchronizes with {} ms",
                    candidate.feed_id, heartbeat, fired
                ));
                selected.insert(candidate.feed_id.clone());
                added.push(candidate.feed_id.clone());
            }
        }
    }

    if optimization.is_enabled() {
        // Sharing is transitive: repeat until no package pulls in a new feed.
        loop {
            let mut grew = false;
            for candidate in candidates {
                if selected.contains(&candidate.feed_id) {
                    continue;
                }
                let shares = packages
                    .feeds_sharing_packages_with(&candidate.feed_id)
                    .into_iter()
                    .find(|other| selected.contains(*other))
                    .map(str::to_string);
                if let Some(other) = shares {
                    decision.messages.push(format!(
                        "Feed {} added for gas optimization: delivered by the same data package as {}",
                        candidate.feed_id, other
                    ));
                    selected.insert(candidate.feed_id.clone());
                    added.push(candidate.feed_id.clone());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
    }

    if added.is_empty() {
        return;
    }

    debug!(added = ?added, "Update set widened for gas optimization");
    decision.feeds_to_update = candidates
        .iter()
        .filter(|c| selected.contains(&c.feed_id))
        .map(|c| c.feed_id.clone())
        .collect();
    decision
        .messages
        .push(format!("Data feeds to be updated: {}", decision.feeds_to_update.join(",")));
}
