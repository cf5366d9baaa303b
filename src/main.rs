use anyhow::Result;
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use balancerd::{
    admin::AdminApi,
    balancer::Balancer,
    config,
    health::HealthMonitor,
    metrics::MetricsRegistry,
    proxy::Forwarder,
    registry::Registry,
    server::{RequestHandler, ServerBuilder},
};

/// How long shutdown waits for the health monitor to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("balancerd=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    let metrics_registry = MetricsRegistry::new()?;
    let metrics = Some(metrics_registry.collector());

    let registry = Arc::new(Registry::from_config(&config.servers)?);
    let balancer = Arc::new(Balancer::new(config.load_balancer.algorithm));

    let monitor = Arc::new(HealthMonitor::new(
        config.load_balancer.health_check_interval(),
        registry.clone(),
        metrics.clone(),
    ));
    let monitor_handle = tokio::spawn(monitor.clone().start());

    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone()).await?;
    }

    let forwarder = Arc::new(Forwarder::new(
        registry.clone(),
        balancer.clone(),
        config.load_balancer.timeout(),
        metrics,
    ));
    let admin = Arc::new(AdminApi::new(registry, balancer));
    let handler = RequestHandler::new(forwarder, admin);

    info!(
        algorithm = %config.load_balancer.algorithm,
        backends = config.servers.len(),
        "starting load balancer on {}",
        config.load_balancer.listen
    );

    let server = ServerBuilder::new(config.load_balancer.listen).with_handler(handler);

    tokio::select! {
        result = server.serve() => {
            result?;
        }
        _ = shutdown_signal() => {}
    }

    monitor.shutdown();
    match tokio::time::timeout(SHUTDOWN_GRACE, monitor_handle).await {
        Ok(Err(e)) => error!("health monitor task failed: {}", e),
        Err(_) => warn!("health monitor did not stop within grace period"),
        Ok(Ok(())) => {}
    }

    info!("shutdown complete");
    Ok(())
}

async fn start_metrics_server(
    addr: SocketAddr,
    registry: MetricsRegistry,
    path: String,
) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    if req.uri().path() == path.as_str() {
                        let metrics = registry.gather();
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::OK)
                                .header("Content-Type", "text/plain; version=0.0.4")
                                .body(Body::from(metrics))
                                .unwrap(),
                        )
                    } else {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::NOT_FOUND)
                                .body(Body::from("Not Found"))
                                .unwrap(),
                        )
                    }
                }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_service);

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
