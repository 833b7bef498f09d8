//! Update-decision engine.
//!
//! Selection runs in four stages:
//! 1. Every feed with packages is evaluated; a feed is selected if any of its
//!    triggers fires.
//! 2. Selected feeds whose proposed package timestamp is not strictly newer
//!    than the stored one are dropped.
//! 3. A non-empty selection is widened for gas optimization.
//! 4. The final set is put back into config order.

use crate::conditions::{
    check_cron_condition, check_package_disjointness, check_time_condition, check_value_deviation,
    combine_deviation_checks, needs_historical_check, ConditionCheck, ConditionKind,
    DeviationCheck,
};
use crate::config::{FallbackConfig, FeedTriggers, OptimizationConfig, UpdateTrigger};
use crate::context::IterationContext;
use crate::gas_optimization::{augment, Candidate};
use relayer_api::FeedId;
use relayer_chain::ContractSnapshot;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument, warn};

/// Outcome of one evaluation.
#[derive(Debug, Clone, Default)]
pub struct UpdateDecision {
    pub block_number: u64,
    /// Feeds to write, in config order
    pub feeds_to_update: Vec<FeedId>,
    /// Deviation ratio of every feed whose deviation was evaluated
    pub deviation_ratios: BTreeMap<FeedId, f64>,
    /// Heartbeat intervals that fired this iteration
    pub heartbeat_updates: BTreeSet<u64>,
    /// A time or cron trigger of a selected feed fired
    pub hard_deadline: bool,
    pub messages: Vec<String>,
}

impl UpdateDecision {
    pub fn should_update(&self) -> bool {
        !self.feeds_to_update.is_empty()
    }

    /// The update is only deviation-driven, so skipping it breaks no deadline.
    pub fn is_optional(&self) -> bool {
        !self.hard_deadline
    }

    pub fn rationale(&self) -> String {
        self.messages.join("; ")
    }
}

/// Per-feed evaluation result.
#[derive(Debug, Default)]
struct FeedEvaluation {
    selected: bool,
    deadline: bool,
    fired_messages: Vec<String>,
    idle_messages: Vec<String>,
}

impl FeedEvaluation {
    fn record(&mut self, feed_id: &str, kind: ConditionKind, check: ConditionCheck) {
        let messages = check
            .messages
            .into_iter()
            .map(|m| format!("{} [{}]: {}", feed_id, kind, m));
        if check.should_update {
            self.selected = true;
            if kind != ConditionKind::ValueDeviation {
                self.deadline = true;
            }
            self.fired_messages.extend(messages);
        } else {
            self.idle_messages.extend(messages);
        }
    }
}

/// Evaluates feed triggers against an [`IterationContext`].
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    triggers: FeedTriggers,
    fallback: FallbackConfig,
    optimization: OptimizationConfig,
}

impl DecisionEngine {
    pub fn new(
        triggers: FeedTriggers,
        fallback: FallbackConfig,
        optimization: OptimizationConfig,
    ) -> Self {
        Self {
            triggers,
            fallback,
            optimization,
        }
    }

    pub fn triggers(&self) -> &FeedTriggers {
        &self.triggers
    }

    #[instrument(skip_all, fields(block_number = ctx.block_number))]
    pub async fn evaluate(&self, ctx: &IterationContext) -> UpdateDecision {
        let mut decision = UpdateDecision {
            block_number: ctx.block_number,
            ..Default::default()
        };

        let mut missing = Vec::new();
        let mut fired_messages = Vec::new();
        let mut idle_messages = Vec::new();
        let mut selected = Vec::new();
        let mut deadline_feeds = BTreeSet::new();
        let mut candidates = Vec::new();

        for trigger in self.triggers.iter() {
            let feed_id = &trigger.feed_id;
            if !ctx.packages.contains_feed(feed_id) {
                missing.push(feed_id.clone());
                continue;
            }
            let Some(snapshot) = ctx.snapshot(feed_id) else {
                warn!(feed_id = %feed_id, "No contract state for feed, skipping");
                idle_messages.push(format!("{}: no contract state available", feed_id));
                continue;
            };

            let evaluation = self.evaluate_feed(trigger, snapshot, ctx, &mut decision).await;
            fired_messages.extend(evaluation.fired_messages);
            idle_messages.extend(evaluation.idle_messages);

            let fresh = match ctx.packages.timestamp_for(feed_id) {
                Some(proposed) if proposed > snapshot.last_data_package_timestamp_ms => true,
                proposed => {
                    if evaluation.selected {
                        let msg = format!(
                            "Cannot update prices, proposed prices are not newer than stored price for {} (proposed {:?}, stored {})",
                            feed_id, proposed, snapshot.last_data_package_timestamp_ms
                        );
                        warn!(feed_id = %feed_id, "{}", msg);
                        fired_messages.push(msg);
                    }
                    false
                }
            };
            if !fresh {
                continue;
            }

            candidates.push(Candidate::new(
                feed_id.clone(),
                self.triggers.heartbeat_at(trigger, ctx.now_ms),
            ));
            if evaluation.selected {
                selected.push(feed_id.clone());
                if evaluation.deadline {
                    deadline_feeds.insert(feed_id.clone());
                }
            }
        }

        if !missing.is_empty() {
            decision
                .messages
                .push(format!("Missing data package for feed(s): {}", missing.join(", ")));
        }
        decision.messages.extend(fired_messages);
        decision.messages.extend(idle_messages);

        decision.hard_deadline = !deadline_feeds.is_empty();
        decision.feeds_to_update = selected;

        if decision.should_update() {
            decision.messages.push(format!(
                "Data feeds that require update: {}",
                decision.feeds_to_update.join(",")
            ));
            augment(&mut decision, &candidates, &self.optimization, &ctx.packages);
        }

        let order: Vec<FeedId> = self.triggers.feed_ids();
        decision
            .feeds_to_update
            .sort_by_key(|f| order.iter().position(|o| o == f));

        debug!(
            feeds = ?decision.feeds_to_update,
            hard_deadline = decision.hard_deadline,
            "Update decision evaluated"
        );
        decision
    }

    async fn evaluate_feed(
        &self,
        trigger: &UpdateTrigger,
        snapshot: &ContractSnapshot,
        ctx: &IterationContext,
        decision: &mut UpdateDecision,
    ) -> FeedEvaluation {
        let feed_id = trigger.feed_id.as_str();
        let mut evaluation = FeedEvaluation::default();

        if let Some(heartbeat) = self.triggers.heartbeat_at(trigger, ctx.now_ms) {
            let check = check_time_condition(
                heartbeat,
                snapshot.last_block_timestamp_ms,
                ctx.now_ms,
                self.fallback.offset_ms,
            );
            if check.should_update {
                decision.heartbeat_updates.insert(heartbeat);
            }
            evaluation.record(feed_id, ConditionKind::Time, check);
        }

        if !trigger.cron.is_empty() {
            let check = check_cron_condition(
                &trigger.cron,
                snapshot.last_block_timestamp_ms,
                ctx.now_ms,
                self.fallback.offset_ms,
            );
            evaluation.record(feed_id, ConditionKind::Cron, check);
        }

        if let Some(threshold) = trigger.deviation_percentage {
            for warning in check_package_disjointness(feed_id, &ctx.packages) {
                evaluation.idle_messages.push(warning);
            }

            let latest = check_value_deviation(feed_id, &ctx.packages, snapshot.last_value, threshold);
            let historical = if needs_historical_check(&latest, &self.fallback) {
                Some(match ctx.historical.get().await {
                    Some(packages) => {
                        check_value_deviation(feed_id, packages, snapshot.last_value, threshold)
                    }
                    None => DeviationCheck {
                        should_update: false,
                        max_deviation: 0.0,
                        max_deviation_ratio: 0.0,
                        message: "historical packages unavailable".into(),
                    },
                })
            } else {
                None
            };

            let check = combine_deviation_checks(
                latest,
                historical,
                &self.fallback,
                snapshot.last_block_timestamp_ms,
                ctx.now_ms,
            );
            if let Some(ratio) = check.max_deviation_ratio {
                decision.deviation_ratios.insert(feed_id.to_string(), ratio);
            }
            evaluation.record(feed_id, ConditionKind::ValueDeviation, check);
        }

        evaluation
    }
}
