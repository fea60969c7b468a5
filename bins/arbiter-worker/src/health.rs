// Liveness and readiness endpoints for the worker
use arbiter_engine::Engine;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub fn routes(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(engine)
}

/// GET /health - process is up
async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /ready - isolation runtime reachable at last contact
async fn ready(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    readiness(engine.is_ready())
}

fn readiness(ready: bool) -> (StatusCode, &'static str) {
    if ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "SANDBOX UNAVAILABLE")
    }
}

pub async fn serve(addr: SocketAddr, engine: Arc<Engine>) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind health endpoint");
            return;
        }
    };

    info!(addr = %addr, "Health endpoint listening");
    if let Err(e) = axum::serve(listener, routes(engine)).await {
        error!(error = %e, "Health endpoint stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_status() {
        assert_eq!(readiness(true).0, StatusCode::OK);
        assert_eq!(readiness(false).0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_is_always_ok() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
