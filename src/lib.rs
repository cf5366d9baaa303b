pub mod admin;
pub mod balancer;
pub mod config;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod server;
