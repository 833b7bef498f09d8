//! Parsed per-feed update triggers.
//!
//! Triggers are resolved once at startup. A configured temporary override is
//! applied on every read and stops applying by itself once its expiry passes;
//! nothing mutates the base triggers.

use super::RelayerConfig;
use crate::conditions::CronSchedule;
use crate::error::ConfigResult;
use relayer_api::FeedId;

/// Update trigger of one feed.
#[derive(Debug, Clone)]
pub struct UpdateTrigger {
    pub feed_id: FeedId,
    pub deviation_percentage: Option<f64>,
    pub heartbeat_ms: Option<u64>,
    pub cron: Vec<CronSchedule>,
}

impl UpdateTrigger {
    pub fn new(feed_id: impl Into<FeedId>) -> Self {
        Self {
            feed_id: feed_id.into(),
            deviation_percentage: None,
            heartbeat_ms: None,
            cron: Vec::new(),
        }
    }

    pub fn with_deviation(mut self, percentage: f64) -> Self {
        self.deviation_percentage = Some(percentage);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat_ms: u64) -> Self {
        self.heartbeat_ms = Some(heartbeat_ms);
        self
    }

    pub fn with_cron(mut self, schedule: CronSchedule) -> Self {
        self.cron.push(schedule);
        self
    }
}

/// Heartbeat applied to every heartbeat feed until `expires_at_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporaryOverride {
    pub heartbeat_ms: u64,
    pub expires_at_ms: u64,
}

impl TemporaryOverride {
    pub fn is_active(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// Triggers of all feeds in config order.
#[derive(Debug, Clone)]
pub struct FeedTriggers {
    triggers: Vec<UpdateTrigger>,
    temporary: Option<TemporaryOverride>,
}

impl FeedTriggers {
    pub fn new(triggers: Vec<UpdateTrigger>) -> Self {
        Self {
            triggers,
            temporary: None,
        }
    }

    pub fn with_override(mut self, temporary: TemporaryOverride) -> Self {
        self.temporary = Some(temporary);
        self
    }

    /// Resolve triggers from a validated config. `started_at_ms` anchors the override.
    pub fn from_config(config: &RelayerConfig, started_at_ms: u64) -> ConfigResult<Self> {
        let triggers = config
            .feeds
            .iter()
            .map(|feed| {
                Ok(UpdateTrigger {
                    feed_id: feed.id.clone(),
                    deviation_percentage: feed.deviation_percentage,
                    heartbeat_ms: feed.heartbeat_ms,
                    cron: feed
                        .cron
                        .iter()
                        .map(|c| CronSchedule::parse(c))
                        .collect::<ConfigResult<_>>()?,
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        let temporary = config.temporary_override.map(|o| TemporaryOverride {
            heartbeat_ms: o.heartbeat_ms,
            expires_at_ms: started_at_ms.saturating_add(o.duration_ms),
        });

        Ok(Self {
            triggers,
            temporary,
        })
    }

    pub fn feed_ids(&self) -> Vec<FeedId> {
        self.triggers.iter().map(|t| t.feed_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn get(&self, feed_id: &str) -> Option<&UpdateTrigger> {
        self.triggers.iter().find(|t| t.feed_id == feed_id)
    }

    /// Heartbeat of `trigger` as seen at `now_ms`.
    pub fn heartbeat_at(&self, trigger: &UpdateTrigger, now_ms: u64) -> Option<u64> {
        match (trigger.heartbeat_ms, self.temporary) {
            (Some(_), Some(o)) if o.is_active(now_ms) => Some(o.heartbeat_ms),
            (heartbeat, _) => heartbeat,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpdateTrigger> {
        self.triggers.iter()
    }
}
