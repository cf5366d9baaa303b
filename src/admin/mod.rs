use crate::balancer::{Algorithm, Balancer};
use crate::registry::Registry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),
}

#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub algorithm: Algorithm,
    pub total_backends: usize,
    pub healthy_backends: usize,
    pub backends: Vec<BackendStats>,
}

#[derive(Debug, Serialize)]
pub struct BackendStats {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub healthy: bool,
    pub weight: u32,
    pub active_connections: usize,
    pub total_requests: u64,
    pub avg_latency_ms: f64,
    pub last_probe: Option<DateTime<Utc>>,
}

/// Read-only snapshots plus the two administrative mutations. The serving
/// layer maps `ControlError` to 400/404.
pub struct AdminApi {
    registry: Arc<Registry>,
    balancer: Arc<Balancer>,
}

impl AdminApi {
    pub fn new(registry: Arc<Registry>, balancer: Arc<Balancer>) -> Self {
        Self { registry, balancer }
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let mut backends = Vec::with_capacity(self.registry.list().len());
        let mut healthy_backends = 0;

        for backend in self.registry.list() {
            let state = backend.state().await;
            if state.enabled && state.healthy {
                healthy_backends += 1;
            }
            backends.push(BackendStats {
                name: backend.name.clone(),
                url: backend.url.to_string(),
                enabled: state.enabled,
                healthy: state.healthy,
                weight: backend.weight,
                active_connections: state.active_connections,
                total_requests: state.total_requests,
                avg_latency_ms: state.avg_latency().as_secs_f64() * 1000.0,
                last_probe: state.last_probe,
            });
        }

        StatsSnapshot {
            algorithm: self.balancer.algorithm().await,
            total_backends: backends.len(),
            healthy_backends,
            backends,
        }
    }

    pub async fn set_algorithm(&self, name: &str) -> Result<Algorithm, ControlError> {
        let algorithm = Algorithm::from_name(name)
            .ok_or_else(|| ControlError::UnknownAlgorithm(name.to_string()))?;
        self.balancer.set_algorithm(algorithm).await;
        info!(%algorithm, "load balancing algorithm changed");
        Ok(algorithm)
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), ControlError> {
        self.registry
            .set_enabled(name, enabled)
            .await
            .map_err(|_| ControlError::UnknownBackend(name.to_string()))?;
        info!(
            backend = name,
            enabled,
            "backend {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::time::Duration;

    fn server(name: &str, port: u16, weight: u32) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            weight,
            health_check_path: "/health".to_string(),
            enabled: true,
        }
    }

    fn admin() -> AdminApi {
        let registry =
            Arc::new(Registry::from_config(&[server("a", 8001, 1), server("b", 8002, 3)]).unwrap());
        let balancer = Arc::new(Balancer::new(Algorithm::RoundRobin));
        AdminApi::new(registry, balancer)
    }

    #[tokio::test]
    async fn snapshot_reflects_registry_state() {
        let admin = admin();
        let backend = admin.registry.find("a").unwrap();
        backend.begin_request().await;
        backend.record_probe(false, Duration::from_millis(40)).await;

        let snapshot = admin.snapshot().await;
        assert_eq!(snapshot.algorithm, Algorithm::RoundRobin);
        assert_eq!(snapshot.total_backends, 2);
        assert_eq!(snapshot.healthy_backends, 1);

        let a = &snapshot.backends[0];
        assert_eq!(a.name, "a");
        assert!(!a.healthy);
        assert_eq!(a.active_connections, 1);
        assert_eq!(a.total_requests, 1);
        assert!(a.avg_latency_ms > 0.0);
        assert!(a.last_probe.is_some());

        let b = &snapshot.backends[1];
        assert_eq!(b.weight, 3);
        assert_eq!(b.avg_latency_ms, 0.0);
        assert!(b.last_probe.is_none());
    }

    #[tokio::test]
    async fn set_algorithm_accepts_known_names_only() {
        let admin = admin();
        assert_eq!(
            admin.set_algorithm("least_connections").await.unwrap(),
            Algorithm::LeastConnections
        );
        assert!(matches!(
            admin.set_algorithm("fastest").await,
            Err(ControlError::UnknownAlgorithm(_))
        ));
        assert_eq!(
            admin.snapshot().await.algorithm,
            Algorithm::LeastConnections
        );
    }

    #[tokio::test]
    async fn set_enabled_unknown_backend_is_an_error() {
        let admin = admin();
        admin.set_enabled("a", false).await.unwrap();
        assert!(matches!(
            admin.set_enabled("ghost", true).await,
            Err(ControlError::UnknownBackend(_))
        ));
        assert_eq!(admin.snapshot().await.healthy_backends, 1);
    }
}
