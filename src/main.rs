//! Oracle price relayer
//!
//! Pushes signed off-chain price packages to an on-chain adapter contract when
//! an update condition is met.
//! Features:
//! - Heartbeat, cron and value-deviation update triggers
//! - Gas-optimized batching of near-due feeds
//! - Optional OEV auction delivery with guaranteed fallback
//! - Historical fallback mode for backup relayers

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relayer_api::{GatewayClient, HealthcheckPinger, HttpAuctionClient};
use relayer_chain::{build_rpc_stack, create_adapter, create_gas_strategy, TransactionSenderBuilder, TxSubmitter};
use relayer_core::{
    now_ms, AuctionSettings, ContextFetcher, DecisionEngine, DeliveryManager, DeliverySettings,
    FeedTriggers, IterationRunner, IterationTrigger, RelayerConfig,
};

/// Environment variable names.
mod env {
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Arc::new(RelayerConfig::load_from_env()?);
    info!(
        name = %config.name,
        chain = %config.chain.name,
        chain_id = config.chain.chain_id,
        adapter = %config.adapter.contract_address,
        feeds = config.feeds.len(),
        "Starting relayer"
    );

    let runner = initialize_components(&config).await?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, finishing current iteration"),
                Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        });
    }

    runner
        .run(IterationTrigger::Interval(config.iteration_interval()), shutdown)
        .await;

    info!("Relayer stopped");
    Ok(())
}

fn init_tracing() {
    let json = std::env::var(env::LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relayer_core=debug,relayer_chain=info")),
        )
        .init();
}

async fn initialize_components(config: &RelayerConfig) -> Result<IterationRunner> {
    info!("Initializing components...");

    // RPC: http -> fallback -> tracing
    let rpc = build_rpc_stack(
        &config.chain.rpc_urls,
        config.timeouts.single_provider(),
        config.timeouts.all_providers(),
    )?;

    let gas = &config.chain.gas;
    let private_key = std::env::var(env::PRIVATE_KEY)
        .with_context(|| format!("Missing env var: {}", env::PRIVATE_KEY))?;
    let sender = TransactionSenderBuilder::new(rpc.clone(), config.chain.chain_id)
        .gas_strategy(create_gas_strategy(
            gas.pricing.as_str(),
            gas.default_gas_price_gwei,
            gas.max_gas_price_gwei,
            gas.priority_fee_gwei,
        ))
        .gas_limit(gas.gas_limit)
        .gas_multiplier(gas.gas_multiplier)
        .build(&private_key)
        .await?;
    let sender: Arc<dyn TxSubmitter> = Arc::new(sender);
    info!(address = %sender.address(), "Transaction sender initialized");

    let adapter = create_adapter(
        config.adapter_kind()?,
        config.adapter.contract_address,
        rpc.clone(),
        sender.clone(),
    );
    info!(kind = %adapter.kind(), contract = %adapter.contract_address(), "Adapter configured");

    // Package gateways
    let gateway = Arc::new(GatewayClient::new(
        config.gateway_urls.clone(),
        config.timeouts.all_providers(),
    ));
    let historical_gateway = Arc::new(GatewayClient::new(
        config.historical_gateway_urls().to_vec(),
        config.timeouts.all_providers(),
    ));

    let fetcher = ContextFetcher::new(config, adapter.clone(), rpc.clone(), gateway, historical_gateway);

    let triggers = FeedTriggers::from_config(config, now_ms())?;
    let engine = DecisionEngine::new(
        triggers,
        config.fallback.clone(),
        config.optimization.clone(),
    );

    let mut delivery =
        DeliveryManager::new(adapter.clone(), rpc.clone(), DeliverySettings::from_config(config));
    if let (Some(auction), Some(settings)) = (config.active_auction(), AuctionSettings::from_config(config)) {
        let url = auction
            .url
            .clone()
            .context("Auction is enabled but has no url")?;
        info!(url = %url, "OEV auction enabled");
        let client = Arc::new(HttpAuctionClient::new(url, config.timeouts.auction_resolve()));
        delivery = delivery.with_auction(client, rpc.clone(), sender.clone(), config.chain.chain_id, settings);
    }

    let health = Arc::new(HealthcheckPinger::new(
        config.healthcheck_ping_url.clone(),
        config.timeouts.health_ping(),
    ));
    if let Some(until) = config.paused_until {
        warn!(until = %until, "Relayer configured as paused");
    }

    info!("All components initialized");

    Ok(IterationRunner::new(fetcher, engine, delivery, adapter, health)
        .with_health_timeout(config.timeouts.health_ping())
        .paused_until(config.paused_until))
}
