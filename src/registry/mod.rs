mod backend;

pub use backend::{Backend, LiveState, LATENCY_WINDOW};

use crate::config::ServerConfig;
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown backend: {0}")]
    BackendNotFound(String),
}

/// An eligible backend plus the load reading the selection strategies need,
/// captured in one pass so a pick works off a consistent snapshot.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub backend: Arc<Backend>,
    pub active_connections: usize,
}

/// The ordered set of backends. Populated once at startup; configuration
/// order is preserved because it is the round-robin rotation order.
pub struct Registry {
    backends: Vec<Arc<Backend>>,
}

impl Registry {
    pub fn from_config(servers: &[ServerConfig]) -> Result<Self> {
        let backends = servers
            .iter()
            .map(|config| Backend::from_config(config).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        for backend in &backends {
            tracing::info!(backend = %backend.name, url = %backend.url, weight = backend.weight, "registered backend");
        }

        Ok(Self { backends })
    }

    pub fn list(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn find(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends.iter().find(|b| b.name == name).cloned()
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let backend = self
            .find(name)
            .ok_or_else(|| RegistryError::BackendNotFound(name.to_string()))?;
        backend.set_enabled(enabled).await;
        Ok(())
    }

    /// Snapshot of enabled-and-healthy backends in registry order.
    pub async fn eligible(&self) -> Vec<Candidate> {
        let mut candidates = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            let state = backend.state().await;
            if state.enabled && state.healthy {
                candidates.push(Candidate {
                    backend: backend.clone(),
                    active_connections: state.active_connections,
                });
            }
        }
        candidates
    }

    pub async fn healthy_count(&self) -> usize {
        let mut count = 0;
        for backend in &self.backends {
            if backend.is_eligible().await {
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::time::Duration;

    fn server(name: &str, port: u16) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            weight: 1,
            health_check_path: "/health".to_string(),
            enabled: true,
        }
    }

    fn registry() -> Registry {
        Registry::from_config(&[server("a", 8001), server("b", 8002), server("c", 8003)]).unwrap()
    }

    #[tokio::test]
    async fn preserves_configuration_order() {
        let registry = registry();
        let names: Vec<_> = registry.list().iter().map(|b| b.name.clone()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn set_enabled_unknown_name_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.set_enabled("nope", false).await,
            Err(RegistryError::BackendNotFound(_))
        ));
    }

    #[tokio::test]
    async fn eligible_excludes_disabled_and_unhealthy() {
        let registry = registry();
        registry.set_enabled("b", false).await.unwrap();
        registry
            .find("c")
            .unwrap()
            .record_probe(false, Duration::from_millis(1))
            .await;

        let eligible = registry.eligible().await;
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].backend.name, "a");
        assert_eq!(registry.healthy_count().await, 1);
    }

    #[tokio::test]
    async fn eligible_carries_current_connection_counts() {
        let registry = registry();
        let a = registry.find("a").unwrap();
        a.begin_request().await;
        a.begin_request().await;

        let eligible = registry.eligible().await;
        assert_eq!(eligible[0].active_connections, 2);
        assert_eq!(eligible[1].active_connections, 0);
    }
}
