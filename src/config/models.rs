use crate::balancer::Algorithm;
use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    pub algorithm: Algorithm,
    /// Health probe period, seconds.
    pub health_check_interval: u64,
    /// Forwarding timeout, seconds.
    pub timeout: u64,
}

impl LoadBalancerConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_health_path")]
    pub health_check_path: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Config {
    /// Startup-time sanity checks. Any violation is fatal: running with a
    /// half-valid backend list would silently misroute traffic.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            bail!("configuration lists no backend servers");
        }

        if self.load_balancer.health_check_interval == 0 {
            bail!("health_check_interval must be at least 1 second");
        }

        if self.load_balancer.timeout == 0 {
            bail!("timeout must be at least 1 second");
        }

        let mut names = HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                bail!("backend with empty name");
            }
            if !names.insert(server.name.as_str()) {
                bail!("duplicate backend name: {}", server.name);
            }
            if server.weight < 1 {
                bail!(
                    "backend {} has weight {}, minimum is 1",
                    server.name,
                    server.weight
                );
            }
            if !server.health_check_path.starts_with('/') {
                bail!(
                    "backend {} health_check_path must start with '/': {}",
                    server.name,
                    server.health_check_path
                );
            }
        }

        Ok(())
    }
}

fn default_listen() -> SocketAddr {
    ([0, 0, 0, 0], 8080).into()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_enabled() -> bool {
    true
}
