mod handlers;
mod stats;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::NodeError;
use crate::manager::Manager;

/// The node's public HTTP surface. Every route sees the unspoofable remote
/// address through `ConnectInfo`.
pub fn router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/", get(handlers::identity))
        .route("/vpn", get(handlers::vpn))
        .route("/worker", post(handlers::worker_register))
        .route("/worker/feedback", post(handlers::worker_feedback))
        .route(
            "/validator/broadcast/mining_pool",
            post(handlers::broadcast_mining_pool),
        )
        .route(
            "/validator/broadcast/workers",
            post(handlers::broadcast_workers),
        )
        .route("/validator/score/mining_pools", get(handlers::pool_scores))
        .route("/validator/score/audit/{pool_uid}", get(stats::pool_audit))
        .route("/protocol/broadcast/neurons", post(handlers::neurons))
        .route("/protocol/challenge/{id}", get(handlers::challenge_solution))
        .route("/challenge/new", get(handlers::challenge_new))
        .route(
            "/api/status/request/{request_id}",
            get(handlers::request_status),
        )
        .route("/api/stats", get(stats::stats))
        .route("/api/stats/pools", get(stats::stats_pools))
        .route("/api/stats/workers", get(stats::stats_workers))
        .with_state(manager)
}

pub async fn serve(manager: Arc<Manager>, bind: SocketAddr) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "http surface listening");

    axum::serve(
        listener,
        router(manager).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| NodeError::internal(format!("http server: {e}")))
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = match &self {
            NodeError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            NodeError::NotFound { .. } => StatusCode::NOT_FOUND,
            NodeError::ValidationFailed { .. } | NodeError::WireGuardParse { .. } => {
                StatusCode::BAD_REQUEST
            }
            NodeError::LeaseExhausted { .. } | NodeError::NotReady { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            NodeError::FanOutExhausted { .. } | NodeError::Upstream { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
