//! Loading and startup validation of the relayer config.

use super::RelayerConfig;
use crate::conditions::CronSchedule;
use crate::error::{ConfigError, ConfigResult};
use relayer_chain::AdapterKind;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Default config location when `RELAYER_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "./config/relayer.toml";

impl RelayerConfig {
    /// Load config from a TOML file, expanding `${VAR}` references first.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(&expand_env(content))?)
    }

    /// Load from `RELAYER_CONFIG` (or the default path) and validate.
    pub fn load_from_env() -> ConfigResult<Self> {
        let path =
            std::env::var("RELAYER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config = Self::from_file(&path)?;
        config.validate()?;
        info!(
            path = %path,
            name = %config.name,
            chain_id = config.chain.chain_id,
            feeds = config.feeds.len(),
            "Relayer configuration loaded"
        );
        Ok(config)
    }

    pub fn adapter_kind(&self) -> ConfigResult<AdapterKind> {
        self.adapter
            .kind
            .parse()
            .map_err(|_| ConfigError::UnsupportedAdapter(self.adapter.kind.clone()))
    }

    /// Check everything that must hold before the first iteration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.chain.rpc_urls.is_empty() {
            return Err(ConfigError::NoRpcUrls);
        }
        if self.gateway_urls.is_empty() {
            return Err(ConfigError::NoGatewayUrls);
        }
        if self.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }
        self.adapter_kind()?;

        let mut seen = HashSet::new();
        for feed in &self.feeds {
            if !seen.insert(feed.id.as_str()) {
                return Err(ConfigError::DuplicateFeed(feed.id.clone()));
            }
            if feed.id.len() > 31 {
                return Err(ConfigError::FeedIdTooLong(feed.id.clone()));
            }
            if !feed.has_triggers() {
                return Err(ConfigError::NoTriggers(feed.id.clone()));
            }
            if let Some(value) = feed.deviation_percentage {
                if !value.is_finite() || value <= 0.0 {
                    return Err(ConfigError::InvalidDeviation {
                        feed_id: feed.id.clone(),
                        value,
                    });
                }
            }
            for expression in &feed.cron {
                CronSchedule::parse(expression)?;
            }
        }

        if let Some(auction) = self.active_auction() {
            if auction.url.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingAuctionUrl);
            }
        }
        if self.iteration_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "iteration_interval_ms",
                reason: "must be positive".into(),
            });
        }
        if self.delivery.max_tx_send_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "delivery.max_tx_send_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if let Some(threshold) = self.optimization.additional_updates_deviation_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "optimization.additional_updates_deviation_threshold",
                    reason: format!("{} is not a non-negative ratio", threshold),
                });
            }
        }
        if !self.chain.gas.gas_multiplier.is_finite() || self.chain.gas.gas_multiplier <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "chain.gas.gas_multiplier",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Expand `${VAR_NAME}` patterns with environment variable values.
///
/// Unknown variables are left untouched.
pub(crate) fn expand_env(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    re.replace_all(s, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}


#[cfg(test)]
mod tests {
    use super::test_support::BASE_CONFIG;
    use super::*;

    #[test]
    fn test_expand_env() {
        std::env::set_var("RELAYER_LOADER_TEST_VAR", "test_value");
        assert_eq!(expand_env("${RELAYER_LOADER_TEST_VAR}"), "test_value");
        assert_eq!(
            expand_env("prefix_${RELAYER_LOADER_TEST_VAR}_suffix"),
            "prefix_test_value_suffix"
        );
        assert_eq!(expand_env("${RELAYER_LOADER_MISSING}"), "${RELAYER_LOADER_MISSING}");
        assert_eq!(expand_env("no_vars"), "no_vars");
        std::env::remove_var("RELAYER_LOADER_TEST_VAR");
    }

    #[test]
    fn test_defaults_applied() {
        let config = RelayerConfig::from_toml_str(BASE_CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.iteration_interval_ms, 10_000);
        assert_eq!(config.chain.gas.gas_limit, 1_000_000);
        assert_eq!(config.chain.gas.gas_multiplier, 1.125);
        assert_eq!(config.timeouts.auction_total_ms, 30_000);
        assert_eq!(config.timeouts.expected_tx_delivery_ms, 20_000);
        assert_eq!(config.delivery.max_tx_send_attempts, 1);
        assert!(!config.fallback.is_active());
        assert!(config.active_auction().is_none());
        assert_eq!(config.historical_gateway_urls(), config.gateway_urls.as_slice());
        assert_eq!(config.feed_ids(), vec!["ETH".to_string(), "BTC".to_string()]);
        assert_eq!(config.adapter_kind().unwrap(), AdapterKind::MultiFeed);
    }

    #[test]
    fn test_auction_without_url_is_fatal() {
        let toml = format!("{}\n[auction]\nomit_fallback_when_optional = true\n", BASE_CONFIG);
        let config = RelayerConfig::from_toml_str(&toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingAuctionUrl)));

        let toml = format!("{}\n[auction]\nenabled = false\n", BASE_CONFIG);
        RelayerConfig::from_toml_str(&toml).unwrap().validate().unwrap();
    }

    #[test]
    fn test_feed_validation() {
        let mut config = RelayerConfig::from_toml_str(BASE_CONFIG).unwrap();
        config.feeds[1].cron.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoTriggers(id)) if id == "BTC"));

        let mut config = RelayerConfig::from_toml_str(BASE_CONFIG).unwrap();
        config.feeds[1].id = "ETH".into();
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateFeed(_))));

        let mut config = RelayerConfig::from_toml_str(BASE_CONFIG).unwrap();
        config.feeds[1].cron = vec!["not a cron".into()];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCron { .. })));

        let mut config = RelayerConfig::from_toml_str(BASE_CONFIG).unwrap();
        config.feeds[0].id = "X".repeat(32);
        assert!(matches!(config.validate(), Err(ConfigError::FeedIdTooLong(_))));
    }

    #[test]
    fn test_unsupported_adapter() {
        let mut config = RelayerConfig::from_toml_str(BASE_CONFIG).unwrap();
        config.adapter.kind = "mento".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedAdapter(kind)) if kind == "mento"
        ));
    }

    #[test]
    fn test_paused_until() {
        let toml = format!("paused_until = \"2030-01-01T00:00:00Z\"\n{}", BASE_CONFIG);
        let config = RelayerConfig::from_toml_str(&toml).unwrap();
        let before = "2029-12-31T23:59:59Z".parse().unwrap();
        let after = "2030-01-01T00:00:01Z".parse().unwrap();
        assert!(config.is_paused(before));
        assert!(!config.is_paused(after));
    }
}
