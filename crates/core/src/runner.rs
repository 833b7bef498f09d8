//! Iteration runner.
//!
//! Drives fetch → evaluate → deliver on a fixed interval or on external
//! notifications. Iterations never overlap: the next one starts only after the
//! previous one has returned. Cancellation is observed between iterations, so
//! an in-flight iteration always completes.

use crate::context::{now_ms, ContextFetcher, IterationContext};
use crate::delivery::{CalldataRegenerator, DeliveryManager, DeliveryOutcome, DeliveryRequest};
use crate::engine::{DecisionEngine, UpdateDecision};
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use relayer_api::HealthMonitor;
use relayer_chain::{ChainAdapter, UpdateScope};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What starts an iteration.
///
/// The binary runs on [`IterationTrigger::Interval`]. `Events` is the entry
/// point for embedders that drive the relayer from their own notifications
/// (new blocks, price streams).
#[derive(Debug)]
pub enum IterationTrigger {
    Interval(Duration),
    /// Push notifications; bursts received during an iteration coalesce into one
    Events(mpsc::Receiver<()>),
}

/// Result of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    Paused,
    NoUpdate,
    Updated(DeliveryOutcome),
}

#[derive(Debug)]
pub struct IterationRunner {
    fetcher: ContextFetcher,
    engine: DecisionEngine,
    delivery: DeliveryManager,
    adapter: Arc<dyn ChainAdapter>,
    health: Arc<dyn HealthMonitor>,
    health_timeout: Duration,
    paused_until: Option<DateTime<Utc>>,
}

impl IterationRunner {
    pub fn new(
        fetcher: ContextFetcher,
        engine: DecisionEngine,
        delivery: DeliveryManager,
        adapter: Arc<dyn ChainAdapter>,
        health: Arc<dyn HealthMonitor>,
    ) -> Self {
        Self {
            fetcher,
            engine,
            delivery,
            adapter,
            health,
            health_timeout: Duration::from_secs(5),
            paused_until: None,
        }
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn paused_until(mut self, until: Option<DateTime<Utc>>) -> Self {
        self.paused_until = until;
        self
    }

    /// Run until `shutdown` is cancelled (or the event stream closes).
    pub async fn run(&self, trigger: IterationTrigger, shutdown: CancellationToken) {
        match trigger {
            IterationTrigger::Interval(period) => {
                info!(interval_ms = period.as_millis() as u64, "Starting relayer loop");
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => self.tick().await,
                    }
                }
            }
            IterationTrigger::Events(mut events) => {
                info!("Starting event-driven relayer loop");
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        event = events.recv() => match event {
                            Some(()) => {
                                self.tick().await;
                                while events.try_recv().is_ok() {}
                            }
                            None => {
                                warn!("Iteration event stream closed");
                                break;
                            }
                        },
                    }
                }
            }
        }
        info!("Relayer loop stopped");
    }

    /// One iteration plus the health ping; errors are logged, never propagated.
    async fn tick(&self) {
        if let Err(e) = self.run_iteration().await {
            error!(error = %e, "Iteration failed");
        }
        if tokio::time::timeout(self.health_timeout, self.health.ping())
            .await
            .is_err()
        {
            warn!(timeout_ms = self.health_timeout.as_millis() as u64, "Healthcheck ping timed out");
        }
    }

    pub async fn run_iteration(&self) -> Result<IterationOutcome> {
        if let Some(until) = self.paused_until.filter(|until| Utc::now() < *until) {
            warn!("Relayer is paused until {}", until.to_rfc3339());
            return Ok(IterationOutcome::Paused);
        }

        let started = Instant::now();
        let ctx = self.fetcher.fetch().await?;
        let decision = self.engine.evaluate(&ctx).await;

        let summary = if decision.should_update() {
            "Update condition satisfied"
        } else {
            "Update condition NOT satisfied"
        };
        info!(
            block_number = decision.block_number,
            iteration_duration_ms = started.elapsed().as_millis() as u64,
            feeds = ?decision.feeds_to_update,
            rationale = %decision.rationale(),
            "{}", summary
        );

        if !decision.should_update() {
            return Ok(IterationOutcome::NoUpdate);
        }

        let request = self.delivery_request(&ctx, &decision)?;
        Ok(IterationOutcome::Updated(self.delivery.deliver(request).await))
    }

    fn delivery_request(
        &self,
        ctx: &IterationContext,
        decision: &UpdateDecision,
    ) -> Result<DeliveryRequest> {
        // all-feeds contracts reject updates that leave any feed out
        let feed_ids = match self.adapter.update_scope() {
            UpdateScope::PerFeed => decision.feeds_to_update.clone(),
            UpdateScope::AllFeeds => self.fetcher.feed_ids().to_vec(),
        };
        let call = self
            .adapter
            .build_update_calldata(&feed_ids, &ctx.packages, ctx.now_ms)?;

        let adapter = self.adapter.clone();
        let source = self.fetcher.package_source();
        let request = self
            .fetcher
            .packages_request(feed_ids.clone(), ctx.unique_signers_threshold);
        let regenerate: CalldataRegenerator = Arc::new(move || {
            let adapter = adapter.clone();
            let source = source.clone();
            let request = request.clone();
            async move {
                let packages = source.request_packages(&request).await?;
                adapter.build_update_calldata(&request.data_feeds, &packages, now_ms())
            }
            .boxed()
        });

        Ok(DeliveryRequest {
            call,
            packages: ctx.packages.clone(),
            metadata_timestamp_ms: ctx.now_ms,
            block_number: ctx.block_number,
            can_omit_fallback: decision.is_optional(),
            regenerate: Some(regenerate),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackConfig, FeedTriggers, OptimizationConfig, RelayerConfig, UpdateTrigger};
    use crate::config::loader::test_support::BASE_CONFIG;
    use crate::delivery::DeliverySettings;
    use crate::test_support::{package_set, snapshot, MockAdapter, MockHealth, MockPackageSource, MockRpc};
    use relayer_chain::ContractData;
    use std::sync::atomic::Ordering;

    struct Harness {
        runner: IterationRunner,
        adapter: Arc<MockAdapter>,
        source: Arc<MockPackageSource>,
        health: Arc<MockHealth>,
    }

    /// ETH fires on a 1s heartbeat, BTC only on a large deviation.
    fn harness() -> Harness {
        harness_with(UpdateScope::PerFeed)
    }

    fn harness_with(scope: UpdateScope) -> Harness {
        let now = now_ms();
        let config = RelayerConfig::from_toml_str(BASE_CONFIG).unwrap();
        let rpc = MockRpc::new();
        let adapter = MockAdapter::new(
            scope,
            ContractData::from([
                ("ETH".into(), snapshot(now - 10_000, now - 10_000, 100.0)),
                ("BTC".into(), snapshot(now - 10_000, now - 10_000, 100.0)),
            ]),
        );
        let source = MockPackageSource::new(package_set(&[("ETH", 100.0), ("BTC", 100.0)], now));
        let health = Arc::new(MockHealth::default());

        let fetcher = ContextFetcher::new(&config, adapter.clone(), rpc.clone(), source.clone(), source.clone());
        let engine = DecisionEngine::new(
            FeedTriggers::new(vec![
                UpdateTrigger::new("ETH").with_heartbeat(1_000),
                UpdateTrigger::new("BTC").with_deviation(50.0),
            ]),
            FallbackConfig::default(),
            OptimizationConfig::default(),
        );
        let delivery = DeliveryManager::new(
            adapter.clone(),
            rpc,
            DeliverySettings {
                max_attempts: 1,
                freshness_budget: Duration::from_secs(20),
                receipt_poll_interval: Duration::from_millis(5),
                receipt_timeout: Duration::from_millis(20),
            },
        );

        Harness {
            runner: IterationRunner::new(fetcher, engine, delivery, adapter.clone(), health.clone()),
            adapter,
            source,
            health,
        }
    }

    #[tokio::test]
    async fn test_iteration_delivers_selected_feeds() {
        let h = harness();
        let outcome = h.runner.run_iteration().await.unwrap();
        assert!(matches!(outcome, IterationOutcome::Updated(DeliveryOutcome::Delivered { .. })));
        let submitted = h.adapter.submitted.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].feed_ids, vec!["ETH".to_string()]);
    }

    #[tokio::test]
    async fn test_all_feeds_adapter_updates_every_feed() {
        let h = harness_with(UpdateScope::AllFeeds);
        let outcome = h.runner.run_iteration().await.unwrap();
        assert!(matches!(outcome, IterationOutcome::Updated(DeliveryOutcome::Delivered { .. })));
        // only ETH fired, the call still carries BTC
        assert_eq!(*h.adapter.built.lock(), vec![vec!["ETH".to_string(), "BTC".to_string()]]);
        assert_eq!(
            h.adapter.submitted.lock()[0].feed_ids,
            vec!["ETH".to_string(), "BTC".to_string()]
        );
    }

    #[tokio::test]
    async fn test_no_update_when_nothing_fires() {
        let h = harness();
        let now = now_ms();
        h.adapter
            .contract_data
            .lock()
            .insert("ETH".into(), snapshot(now - 10_000, now + 60_000, 100.0));
        assert_eq!(h.runner.run_iteration().await.unwrap(), IterationOutcome::NoUpdate);
        assert!(h.adapter.submitted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_paused_iteration_is_skipped() {
        let h = harness();
        let runner = h
            .runner
            .paused_until(Some(Utc::now() + chrono::Duration::hours(1)));
        assert_eq!(runner.run_iteration().await.unwrap(), IterationOutcome::Paused);
        assert_eq!(h.adapter.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_pause_is_ignored() {
        let h = harness();
        let runner = h
            .runner
            .paused_until(Some(Utc::now() - chrono::Duration::hours(1)));
        assert!(matches!(runner.run_iteration().await.unwrap(), IterationOutcome::Updated(_)));
    }

    #[tokio::test]
    async fn test_health_pinged_even_when_iteration_fails() {
        let h = harness();
        h.source.make_unavailable();
        h.runner.tick().await;
        assert_eq!(h.health.pings.load(Ordering::SeqCst), 1);
        assert!(h.adapter.submitted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_events_drive_iterations_until_cancelled() {
        let h = harness();
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        tx.send(()).await.unwrap();
        tx.send(()).await.unwrap();
        let stopper = {
            let shutdown = shutdown.clone();
            let health = h.health.clone();
            tokio::spawn(async move {
                while health.pings.load(Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                shutdown.cancel();
            })
        };

        h.runner.run(IterationTrigger::Events(rx), shutdown).await;
        stopper.await.unwrap();
        // the queued burst coalesced into a single iteration
        assert_eq!(h.health.pings.load(Ordering::SeqCst), 1);
        assert_eq!(h.adapter.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_interval_stops_on_cancel() {
        let h = harness();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        h.runner
            .run(IterationTrigger::Interval(Duration::from_millis(10)), shutdown)
            .await;
        assert_eq!(h.health.pings.load(Ordering::SeqCst), 0);
    }
}
