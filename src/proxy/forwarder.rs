use crate::balancer::Balancer;
use crate::metrics::MetricsCollector;
use crate::registry::{Backend, Registry};
use hyper::header::HeaderName;
use hyper::{Body, HeaderMap, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Headers meaningful only for a single transport leg, stripped in both
/// directions (RFC 7230 §6.1 set).
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| name.as_str().eq_ignore_ascii_case(h))
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("no healthy backends available")]
    NoHealthyBackends,

    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("invalid client request: {0}")]
    BadRequest(String),
}

impl From<&ForwardError> for StatusCode {
    fn from(err: &ForwardError) -> Self {
        match err {
            ForwardError::NoHealthyBackends => StatusCode::SERVICE_UNAVAILABLE,
            ForwardError::Transport(_) => StatusCode::BAD_GATEWAY,
            ForwardError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<ForwardError> for Response<Body> {
    fn from(err: ForwardError) -> Self {
        let status = StatusCode::from(&err);
        let mut response = Response::new(Body::from(err.to_string()));
        *response.status_mut() = status;
        response
    }
}

/// Proxies one client request to a selected backend, keeping the per-backend
/// connection and latency accounting symmetric on every exit path.
pub struct Forwarder {
    registry: Arc<Registry>,
    balancer: Arc<Balancer>,
    client: reqwest::Client,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Forwarder {
    pub fn new(
        registry: Arc<Registry>,
        balancer: Arc<Balancer>,
        timeout: Duration,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        // Redirects stay disabled: a 3xx from the backend belongs to the
        // original caller verbatim.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to create HTTP client");

        Self {
            registry,
            balancer,
            client,
            metrics,
        }
    }

    pub async fn forward(&self, req: Request<Body>) -> Response<Body> {
        match self.try_forward(req).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "request not forwarded");
                err.into()
            }
        }
    }

    async fn try_forward(&self, req: Request<Body>) -> Result<Response<Body>, ForwardError> {
        let candidates = self.registry.eligible().await;
        if candidates.is_empty() {
            return Err(ForwardError::NoHealthyBackends);
        }

        let backend = self
            .balancer
            .select(&candidates)
            .await
            .ok_or(ForwardError::NoHealthyBackends)?;

        let request_id = Uuid::new_v4();
        let (parts, body) = req.into_parts();
        let body = hyper::body::to_bytes(body)
            .await
            .map_err(|e| ForwardError::BadRequest(e.to_string()))?;

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        // Only the authority is rewritten; path and query carry over as-is.
        // Url::join would treat a "//host/x" path as scheme-relative and
        // send the request to a host other than the selected backend.
        let mut target = backend.url.clone();
        target.set_path(parts.uri.path());
        target.set_query(parts.uri.query());

        let headers = outbound_headers(&parts.headers);

        backend.begin_request().await;
        let start = Instant::now();
        let result = self
            .client
            .request(parts.method.clone(), target)
            .headers(headers)
            .body(body)
            .send()
            .await;
        let elapsed = start.elapsed();
        // Exactly one end_request per begin_request, whatever happened on
        // the wire; the arms below only shape the response.
        backend.end_request(elapsed).await;

        if let Some(metrics) = &self.metrics {
            let state = backend.state().await;
            metrics.update_backend_connections(&backend.name, state.active_connections as i64);
        }

        match result {
            Ok(upstream) => {
                let status = upstream.status();
                let upstream_headers = upstream.headers().clone();

                // Log and measure only once the body is in hand: a read
                // failure here surfaces to the client as 502, not as the
                // upstream's status.
                let bytes = match upstream.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(
                            %request_id,
                            backend = %backend.name,
                            method = %parts.method,
                            path = %path_and_query,
                            error = %e,
                            "upstream body read failed"
                        );
                        self.record_metrics(&parts.method, 502, &backend, elapsed);
                        return Err(ForwardError::Transport(e.to_string()));
                    }
                };

                info!(
                    %request_id,
                    backend = %backend.name,
                    method = %parts.method,
                    path = %path_and_query,
                    status = %status,
                    ?elapsed,
                    "request forwarded"
                );
                self.record_metrics(&parts.method, status.as_u16(), &backend, elapsed);

                let mut response = Response::new(Body::from(bytes));
                *response.status_mut() = status;
                for (name, value) in upstream_headers.iter() {
                    if !is_hop_by_hop(name) && *name != hyper::header::CONTENT_LENGTH {
                        response.headers_mut().append(name.clone(), value.clone());
                    }
                }
                Ok(response)
            }
            Err(e) => {
                warn!(
                    %request_id,
                    backend = %backend.name,
                    method = %parts.method,
                    path = %path_and_query,
                    error = %e,
                    "forward attempt failed"
                );
                self.record_metrics(&parts.method, 502, &backend, elapsed);

                let message = if e.is_timeout() {
                    format!("request to {} timed out", backend.name)
                } else {
                    e.to_string()
                };
                Err(ForwardError::Transport(message))
            }
        }
    }

    fn record_metrics(
        &self,
        method: &hyper::Method,
        status: u16,
        backend: &Backend,
        elapsed: Duration,
    ) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(method.as_str(), status, &backend.name, elapsed);
        }
    }
}

/// Copy of the inbound headers fit for the upstream request: hop-by-hop
/// headers go, and so do `host` and `content-length`, which the client
/// regenerates for the rewritten target.
fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound.iter() {
        if is_hop_by_hop(name)
            || *name == hyper::header::HOST
            || *name == hyper::header::CONTENT_LENGTH
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE, HOST, UPGRADE};

    #[test]
    fn hop_by_hop_set_matches_case_insensitively() {
        assert!(is_hop_by_hop(&HeaderName::from_static("connection")));
        assert!(is_hop_by_hop(&HeaderName::from_static("transfer-encoding")));
        assert!(is_hop_by_hop(&"Keep-Alive".parse::<HeaderName>().unwrap()));
        assert!(!is_hop_by_hop(&HeaderName::from_static("content-type")));
    }

    #[test]
    fn outbound_headers_strip_hop_by_hop_and_host() {
        let mut inbound = HeaderMap::new();
        inbound.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert(UPGRADE, HeaderValue::from_static("websocket"));
        inbound.insert(HOST, HeaderValue::from_static("lb.example"));
        inbound.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        inbound.insert("x-request-source", HeaderValue::from_static("cli"));

        let outbound = outbound_headers(&inbound);
        assert!(outbound.get(CONNECTION).is_none());
        assert!(outbound.get(UPGRADE).is_none());
        assert!(outbound.get(HOST).is_none());
        assert_eq!(
            outbound.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(outbound.get("x-request-source").unwrap(), "cli");
    }

    #[test]
    fn forward_errors_map_to_gateway_statuses() {
        let resp: Response<Body> = ForwardError::NoHealthyBackends.into();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp: Response<Body> = ForwardError::Transport("refused".to_string()).into();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
