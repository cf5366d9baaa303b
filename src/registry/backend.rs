use crate::config::ServerConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

/// How many latency samples each backend retains, oldest evicted first.
pub const LATENCY_WINDOW: usize = 10;

/// One upstream target. Identity and weight are fixed at startup; everything
/// the health monitor and forwarder mutate lives behind the state lock so
/// counter updates, history appends, and eligibility reads for one backend
/// are atomic with respect to each other.
#[derive(Debug)]
pub struct Backend {
    pub name: String,
    pub url: Url,
    pub health_url: Url,
    pub weight: u32,
    state: RwLock<LiveState>,
}

#[derive(Debug, Clone)]
pub struct LiveState {
    pub enabled: bool,
    pub healthy: bool,
    pub last_probe: Option<DateTime<Utc>>,
    pub active_connections: usize,
    pub total_requests: u64,
    pub latencies: VecDeque<Duration>,
}

impl LiveState {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            // Optimistic until the first probe sweep says otherwise, so a
            // fresh process does not black-hole traffic for one interval.
            healthy: true,
            last_probe: None,
            active_connections: 0,
            total_requests: 0,
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    pub fn begin_request(&mut self) {
        self.active_connections += 1;
        self.total_requests += 1;
    }

    pub fn end_request(&mut self, latency: Duration) {
        // Clamp: an unmatched decrement must not wrap the counter.
        self.active_connections = self.active_connections.saturating_sub(1);
        self.push_latency(latency);
    }

    /// Every probe outcome lands here, failures included: a failed probe
    /// records the time spent failing (bounded by the probe timeout).
    pub fn record_probe(&mut self, healthy: bool, latency: Duration, at: DateTime<Utc>) {
        self.healthy = healthy;
        self.last_probe = Some(at);
        self.push_latency(latency);
    }

    pub fn avg_latency(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        self.latencies.iter().sum::<Duration>() / self.latencies.len() as u32
    }

    fn push_latency(&mut self, latency: Duration) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }
}

impl Backend {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let url = Url::parse(&format!("http://{}:{}", config.host, config.port))
            .with_context(|| format!("invalid address for backend {}", config.name))?;
        let health_url = url
            .join(&config.health_check_path)
            .with_context(|| format!("invalid health_check_path for backend {}", config.name))?;

        Ok(Self {
            name: config.name.clone(),
            url,
            health_url,
            weight: config.weight,
            state: RwLock::new(LiveState::new(config.enabled)),
        })
    }

    /// Cloned snapshot of the live state.
    pub async fn state(&self) -> LiveState {
        self.state.read().await.clone()
    }

    pub async fn is_eligible(&self) -> bool {
        let state = self.state.read().await;
        state.enabled && state.healthy
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.state.write().await.enabled = enabled;
    }

    pub async fn begin_request(&self) {
        self.state.write().await.begin_request();
    }

    pub async fn end_request(&self, latency: Duration) {
        self.state.write().await.end_request(latency);
    }

    pub async fn record_probe(&self, healthy: bool, latency: Duration) {
        self.state
            .write()
            .await
            .record_probe(healthy, latency, Utc::now());
    }
}
