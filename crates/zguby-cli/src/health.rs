//! `GET /health` and `GET /ready` over the saga's [`HealthHandle`].

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use zguby_core::{HealthHandle, HealthStatus};

pub fn router(health: HealthHandle) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/ready", get(readiness))
        .with_state(health)
}

/// Serves the endpoints until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    health: HealthHandle,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Health endpoint listening");

    axum::serve(listener, router(health))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// 503 once a fatal error halted consumption.
async fn liveness(State(health): State<HealthHandle>) -> (StatusCode, Json<Value>) {
    let status = health.status();
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body(&status)))
}

/// 200 only while messages are being consumed.
async fn readiness(State(health): State<HealthHandle>) -> (StatusCode, Json<Value>) {
    let status = health.status();
    let code = if status.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body(&status)))
}

fn body(status: &HealthStatus) -> Value {
    match status {
        HealthStatus::Halted { reason } => json!({ "status": status.label(), "reason": reason }),
        _ => json!({ "status": status.label() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starting_is_alive_but_not_ready() {
        let health = HealthHandle::new();

        let (code, _) = liveness(State(health.clone())).await;
        assert_eq!(code, StatusCode::OK);

        let (code, Json(body)) = readiness(State(health)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "starting");
    }

    #[tokio::test]
    async fn test_ready() {
        let health = HealthHandle::new();
        health.set_ready();

        let (code, _) = readiness(State(health)).await;
        assert_eq!(code, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_halted_reports_reason() {
        let health = HealthHandle::new();
        health.set_ready();
        health.set_halted("Authentication failed: login failed 3 time(s) in a row");

        let (code, Json(body)) = liveness(State(health.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "halted");
        assert!(body["reason"].as_str().unwrap().contains("login failed"));

        let (code, _) = readiness(State(health)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    }
}
