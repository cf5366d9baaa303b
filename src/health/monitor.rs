use crate::metrics::MetricsCollector;
use crate::registry::{Backend, Registry};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Per-probe timeout. Fixed, and deliberately shorter than any sane check
/// interval so one hanging backend cannot spill into the next sweep.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Background prober. Each sweep spawns one task per enabled backend, so a
/// slow or dead backend never delays the probes of the others.
pub struct HealthMonitor {
    interval: Duration,
    registry: Arc<Registry>,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct ProbeOutcome {
    pub backend: String,
    pub healthy: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

impl HealthMonitor {
    pub fn new(
        interval: Duration,
        registry: Arc<Registry>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            interval,
            registry,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Probe loop. Runs until `shutdown()` is called; the sweep in flight
    /// when the signal arrives is allowed to finish.
    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(interval = ?self.interval, "starting health monitor");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.clone().check_all().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One probe sweep over every enabled backend, returning the per-backend
    /// outcomes. Public so tests can drive a sweep without waiting out the
    /// interval.
    pub async fn check_all(self: Arc<Self>) -> Vec<ProbeOutcome> {
        let mut tasks = Vec::new();

        for backend in self.registry.list() {
            let monitor = self.clone();
            let backend = backend.clone();
            tasks.push(tokio::spawn(async move {
                // Disabled backends are not probed; they keep whatever
                // health state they last had.
                if !backend.state().await.enabled {
                    return None;
                }
                Some(monitor.probe(backend).await)
            }));
        }

        let results = futures::future::join_all(tasks).await;

        let mut outcomes = Vec::new();
        for result in results {
            match result {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => error!("probe task join error: {}", e),
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(
                self.registry.healthy_count().await,
                self.registry.list().len(),
            );
        }

        let healthy = outcomes.iter().filter(|o| o.healthy).count();
        debug!(
            healthy,
            unhealthy = outcomes.len() - healthy,
            "health check sweep complete"
        );

        outcomes
    }

    async fn probe(&self, backend: Arc<Backend>) -> ProbeOutcome {
        let was_healthy = backend.state().await.healthy;
        let start = Instant::now();

        let result = self.client.get(backend.health_url.clone()).send().await;
        let latency = start.elapsed();

        let (healthy, probe_error) = match result {
            Ok(response) if response.status() == StatusCode::OK => (true, None),
            Ok(response) => (false, Some(format!("HTTP {}", response.status()))),
            Err(e) if e.is_timeout() => (false, Some("probe timed out".to_string())),
            Err(e) => (false, Some(e.to_string())),
        };

        backend.record_probe(healthy, latency).await;

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.name, healthy);
        }

        if healthy && !was_healthy {
            info!(backend = %backend.name, ?latency, "backend is healthy again");
        } else if !healthy && was_healthy {
            warn!(
                backend = %backend.name,
                error = probe_error.as_deref().unwrap_or("unknown"),
                "backend marked unhealthy"
            );
        }

        ProbeOutcome {
            backend: backend.name.clone(),
            healthy,
            latency,
            error: probe_error,
        }
    }
}
