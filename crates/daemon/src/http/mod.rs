//! HTTP surface
//!
//! `/client/:handle/*` carries the adapter long-poll protocol; `/status*`
//! exposes suite and adapter state for humans and CI.

mod protocol;
mod status;

use crate::state::Orchestrator;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use trafficlight_common::Error;

/// Largest accepted upload body
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build the router for `orchestrator`
pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/client/:handle/register", post(protocol::register_handler))
        .route("/client/:handle/poll", get(protocol::poll_handler))
        .route("/client/:handle/respond", post(protocol::respond_handler))
        .route("/client/:handle/error", post(protocol::error_handler))
        .route(
            "/client/:handle/upload",
            post(protocol::upload_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/", get(status::root_handler))
        .route("/status", get(status::status_handler))
        .route("/status/junit.xml", get(status::junit_handler))
        .route("/status/suite/:suite_id", get(status::suite_handler))
        .route("/status/:test_case_id", get(status::test_case_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Serve until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    orchestrator: Orchestrator,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// An [`Error`] rendered as `{"error": "<message>"}` with a matching status code
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::UnknownAdapter(_) => StatusCode::NOT_FOUND,
            Error::AdapterInUse(_)
            | Error::AdapterNotBound(_)
            | Error::NoActionPending(_)
            | Error::ActionCollision { .. } => StatusCode::CONFLICT,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_protocol_violation() {
            warn!("Protocol violation: {}", self.0);
        }
        let status = self.status();
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
