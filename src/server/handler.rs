use crate::admin::{AdminApi, ControlError};
use crate::proxy::Forwarder;
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tower::Service;

/// Front-end dispatch: `/admin/*` goes to the control facade, everything
/// else is proxied.
#[derive(Clone)]
pub struct RequestHandler {
    forwarder: Arc<Forwarder>,
    admin: Arc<AdminApi>,
}

impl RequestHandler {
    pub fn new(forwarder: Arc<Forwarder>, admin: Arc<AdminApi>) -> Self {
        Self { forwarder, admin }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let forwarder = self.forwarder.clone();
        let admin = self.admin.clone();
        Box::pin(async move { Ok(route(req, forwarder, admin).await) })
    }
}

async fn route(req: Request<Body>, forwarder: Arc<Forwarder>, admin: Arc<AdminApi>) -> Response<Body> {
    let path = req.uri().path().to_owned();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match segments.as_slice() {
        ["admin", "stats"] if req.method() == Method::GET => {
            json(StatusCode::OK, &admin.snapshot().await)
        }

        ["admin", "algorithm", name] if req.method() == Method::POST => {
            match admin.set_algorithm(name).await {
                Ok(algorithm) => json(
                    StatusCode::OK,
                    &Message {
                        message: format!("Algorithm changed to {algorithm}"),
                    },
                ),
                Err(err) => error_response(err),
            }
        }

        ["admin", "server", name, action @ ("enable" | "disable")]
            if req.method() == Method::POST =>
        {
            let enabled = *action == "enable";
            match admin.set_enabled(name, enabled).await {
                Ok(()) => json(
                    StatusCode::OK,
                    &Message {
                        message: format!("Server {name} {action}d"),
                    },
                ),
                Err(err) => error_response(err),
            }
        }

        ["admin", ..] => json(
            StatusCode::NOT_FOUND,
            &Message {
                message: "unknown admin endpoint".to_string(),
            },
        ),

        _ => forwarder.forward(req).await,
    }
}

#[derive(Serialize)]
struct Message {
    message: String,
}

fn error_response(err: ControlError) -> Response<Body> {
    let status = match err {
        ControlError::UnknownAlgorithm(_) => StatusCode::BAD_REQUEST,
        ControlError::UnknownBackend(_) => StatusCode::NOT_FOUND,
    };
    json(
        status,
        &Message {
            message: err.to_string(),
        },
    )
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            tracing::error!(%e, "failed to serialize response");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
