//! Transaction delivery.
//!
//! A decision is delivered at most once per iteration:
//!
//! ```text
//! [auction configured] -> AUCTION --won--------> STANDARD -> DELIVERED
//!                                 --lost, optional + omit --> SKIPPED
//!                                 --lost-------> STANDARD (fallback)
//! [no auction]        -> STANDARD --hash--> DELIVERED
//!                                 --attempts exhausted--> FAILED
//! ```
//!
//! Calldata older than the freshness budget is rebuilt from fresh packages
//! before it is sent, and it is always rebuilt after an auction phase.
//! Inclusion is watched by a detached [`ReceiptMonitor`].

mod auction;
mod monitor;

pub use auction::{AuctionLane, AuctionSettings, AuctionWin};
pub use monitor::ReceiptMonitor;

use crate::config::RelayerConfig;
use alloy::primitives::B256;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use relayer_api::{AuctionClient, SignedPackageSet};
use relayer_chain::{ChainAdapter, ChainRpc, DeliveryCall, DispatchedTx, TxSubmitter};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Rebuilds the update call from freshly fetched packages.
pub type CalldataRegenerator = Arc<dyn Fn() -> BoxFuture<'static, Result<DeliveryCall>> + Send + Sync>;

/// Everything delivery needs for one decision.
pub struct DeliveryRequest {
    pub call: DeliveryCall,
    /// Packages the call was built from (auction legs are built from them too)
    pub packages: SignedPackageSet,
    pub metadata_timestamp_ms: u64,
    /// Block the decision was made at; auction transactions are simulated on top of it
    pub block_number: u64,
    /// No time or cron deadline depends on this update
    pub can_omit_fallback: bool,
    pub regenerate: Option<CalldataRegenerator>,
}

impl fmt::Debug for DeliveryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryRequest")
            .field("feeds", &self.call.feed_ids)
            .field("can_omit_fallback", &self.can_omit_fallback)
            .field("regenerate", &self.regenerate.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered {
        tx_hash: B256,
        auction_won: bool,
        fallback_used: bool,
    },
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub max_attempts: u32,
    /// Calldata older than this is rebuilt before sending
    pub freshness_budget: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

impl DeliverySettings {
    pub fn from_config(config: &RelayerConfig) -> Self {
        Self {
            max_attempts: config.delivery.max_tx_send_attempts.max(1),
            freshness_budget: config.timeouts.expected_tx_delivery(),
            receipt_poll_interval: config.chain.block_time(),
            receipt_timeout: config.timeouts.expected_tx_delivery() * 3,
        }
    }
}

impl AuctionSettings {
    /// `None` when the auction is disabled.
    pub fn from_config(config: &RelayerConfig) -> Option<Self> {
        let auction = config.active_auction()?;
        Some(Self {
            total: config.timeouts.auction_total(),
            resolve: config.timeouts.auction_resolve(),
            verification: config.timeouts.verification(),
            poll_interval: config.chain.block_time(),
            verify_gas_price: !auction.verify_gas_price_disabled,
            omit_fallback_when_optional: auction.omit_fallback_when_optional,
        })
    }
}

/// Delivers update calls through the auction and the standard path.
pub struct DeliveryManager {
    adapter: Arc<dyn ChainAdapter>,
    auction: Option<AuctionLane>,
    monitor: ReceiptMonitor,
    settings: DeliverySettings,
}

impl fmt::Debug for DeliveryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryManager")
            .field("adapter", &self.adapter.kind())
            .field("auction", &self.auction)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DeliveryManager {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        rpc: Arc<dyn ChainRpc>,
        settings: DeliverySettings,
    ) -> Self {
        let monitor = ReceiptMonitor::new(
            rpc,
            settings.receipt_poll_interval,
            settings.receipt_timeout,
        );
        Self {
            adapter,
            auction: None,
            monitor,
            settings,
        }
    }

    /// Route deliveries through the auction first.
    pub fn with_auction(
        mut self,
        client: Arc<dyn AuctionClient>,
        rpc: Arc<dyn ChainRpc>,
        signer: Arc<dyn TxSubmitter>,
        chain_id: u64,
        settings: AuctionSettings,
    ) -> Self {
        self.auction = Some(AuctionLane::new(
            client,
            self.adapter.clone(),
            rpc,
            signer,
            chain_id,
            settings,
        ));
        self
    }

    pub fn has_auction(&self) -> bool {
        self.auction.is_some()
    }

    #[instrument(skip_all, fields(feeds = ?request.call.feed_ids))]
    pub async fn deliver(&self, request: DeliveryRequest) -> DeliveryOutcome {
        let DeliveryRequest {
            call,
            packages,
            metadata_timestamp_ms,
            block_number,
            can_omit_fallback,
            regenerate,
        } = request;

        let mut auction_won = false;
        let mut fallback_used = false;

        if let Some(lane) = &self.auction {
            match lane.run(&call, &packages, metadata_timestamp_ms, block_number).await {
                Ok(win) => {
                    info!(leg = %win.leg, tx_hash = %win.tx_hash, "Auction won");
                    auction_won = true;
                }
                Err(e) => {
                    warn!(error = %e, "Auction failed");
                    if can_omit_fallback && lane.omit_fallback_when_optional() {
                        info!("Skipping as update was optional");
                        return DeliveryOutcome::Skipped {
                            reason: format!("auction failed ({}) and the update was optional", e),
                        };
                    }
                    fallback_used = true;
                }
            }
        }

        let refresh_first = self.auction.is_some();
        match self.deliver_standard(call, regenerate.as_ref(), refresh_first).await {
            Ok(dispatched) => DeliveryOutcome::Delivered {
                tx_hash: dispatched.hash,
                auction_won,
                fallback_used,
            },
            Err(e) => {
                error!(error = %e, "Update prices tx delivery failed");
                DeliveryOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Send `call`, retrying up to the attempt budget. The first hash ends delivery.
    async fn deliver_standard(
        &self,
        mut call: DeliveryCall,
        regenerate: Option<&CalldataRegenerator>,
        refresh_first: bool,
    ) -> Result<DispatchedTx> {
        let mut last_error = anyhow!("no delivery attempt made");

        for attempt in 1..=self.settings.max_attempts {
            let stale = call.is_stale(self.settings.freshness_budget);
            let refresh = stale || (attempt == 1 && refresh_first);

            if let (true, Some(regenerate)) = (refresh, regenerate) {
                match regenerate().await {
                    Ok(fresh) => call = fresh,
                    Err(e) if stale => {
                        warn!(attempt = attempt, error = %e, "Calldata regeneration failed");
                        last_error = e;
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Calldata regeneration failed, using prepared call");
                    }
                }
            } else if stale {
                warn!(
                    age_ms = call.age().as_millis() as u64,
                    "Sending calldata older than the freshness budget"
                );
            }

            match self.adapter.submit(&call).await {
                Ok(dispatched) => {
                    let (gas_price, max_fee_per_gas, max_priority_fee_per_gas) =
                        dispatched.gas.log_fields();
                    info!(
                        tx_hash = %dispatched.hash,
                        nonce = dispatched.nonce,
                        gas_limit = dispatched.gas_limit,
                        gas_price = ?gas_price,
                        max_fee_per_gas = ?max_fee_per_gas,
                        max_priority_fee_per_gas = ?max_priority_fee_per_gas,
                        attempt = attempt,
                        "Update prices tx delivered"
                    );
                    self.monitor.watch(dispatched.hash);
                    return Ok(dispatched);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt,
                        max_attempts = self.settings.max_attempts,
                        error = %e,
                        "Update prices tx send failed"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error.context(format!(
            "Delivery failed after {} attempt(s)",
            self.settings.max_attempts
        )))
    }
}
