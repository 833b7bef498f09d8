//! Liveness ping towards an external health-check collaborator.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, warn};

/// One-way liveness signal. Implementations must never fail the caller.
#[async_trait]
pub trait HealthMonitor: Send + Sync + Debug {
    async fn ping(&self);
}

/// Pings a URL with a GET request; a missing URL turns pings into no-ops.
#[derive(Debug, Clone)]
pub struct HealthcheckPinger {
    client: reqwest::Client,
    url: Option<String>,
    timeout: Duration,
}

impl HealthcheckPinger {
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }
}

#[async_trait]
impl HealthMonitor for HealthcheckPinger {
    async fn ping(&self) {
        let Some(url) = &self.url else {
            return;
        };
        match self.client.get(url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Healthcheck ping sent");
            }
            Ok(response) => {
                warn!(status = %response.status(), "Healthcheck ping rejected");
            }
            Err(e) => {
                warn!(error = %e, "Healthcheck ping failed");
            }
        }
    }
}
