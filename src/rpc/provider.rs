//! Provider records and health bookkeeping.
//!
//! A provider that fails `failure_threshold` calls in a row is benched
//! and sits out a cooldown window; once the window elapses it rejoins
//! selection at its configured priority with a cleared failure count.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::rate_limiter::TokenBucket;
use super::transport::RpcTransport;
use crate::config::ProviderConfig;

#[derive(Debug, Clone, Default)]
pub struct ProviderStats {
    pub requests: u64,
    pub failures: u64,
}

#[derive(Debug)]
pub struct HealthState {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
    pub last_success: Option<Instant>,
    pub stats: ProviderStats,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            last_failure: None,
            last_success: None,
            stats: ProviderStats::default(),
        }
    }
}

/// One upstream endpoint with its bucket and health record.
pub struct ProviderRecord {
    pub name: String,
    pub url: String,
    pub priority: u8,
    pub transport: Arc<dyn RpcTransport>,
    pub bucket: TokenBucket,
    health: Mutex<HealthState>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl ProviderRecord {
    pub fn new(
        config: &ProviderConfig,
        transport: Arc<dyn RpcTransport>,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            priority: config.priority,
            transport,
            bucket: TokenBucket::new(config.rps_limit, 2),
            health: Mutex::new(HealthState::default()),
            failure_threshold,
            cooldown,
        }
    }

    pub async fn record_success(&self) {
        let mut health = self.health.lock().await;
        health.healthy = true;
        health.consecutive_failures = 0;
        health.last_success = Some(Instant::now());
        health.stats.requests += 1;
    }

    pub async fn record_failure(&self) {
        let mut health = self.health.lock().await;
        health.consecutive_failures += 1;
        health.last_failure = Some(Instant::now());
        health.stats.requests += 1;
        health.stats.failures += 1;
        if health.consecutive_failures >= self.failure_threshold && health.healthy {
            health.healthy = false;
            warn!(
                provider = %self.name,
                failures = health.consecutive_failures,
                "provider benched after consecutive failures"
            );
        }
    }

    /// Whether this provider may be selected right now. An unhealthy
    /// provider whose cooldown has elapsed is revived on the spot.
    pub async fn is_eligible(&self) -> bool {
        let mut health = self.health.lock().await;
        if health.healthy {
            return true;
        }
        match health.last_failure {
            Some(at) if at.elapsed() >= self.cooldown => {
                health.healthy = true;
                health.consecutive_failures = 0;
                debug!(provider = %self.name, "provider cooldown elapsed, re-enabling");
                true
            }
            _ => false,
        }
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.health.lock().await.consecutive_failures
    }

    pub async fn is_healthy(&self) -> bool {
        self.health.lock().await.healthy
    }

    pub async fn stats(&self) -> ProviderStats {
        self.health.lock().await.stats.clone()
    }
}
