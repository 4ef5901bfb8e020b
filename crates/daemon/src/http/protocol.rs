//! Adapter long-poll endpoints

use super::ApiError;
use crate::state::Orchestrator;
use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde_json::{json, Value};
use trafficlight_common::{ActionResponse, CapabilityDescriptor, Error, ErrorReport, PollAction};

type ApiResult = Result<Json<Value>, ApiError>;

fn ok() -> Json<Value> {
    Json(json!({}))
}

pub async fn register_handler(
    State(orchestrator): State<Orchestrator>,
    Path(handle): Path<String>,
    Json(registration): Json<CapabilityDescriptor>,
) -> ApiResult {
    orchestrator.register(&handle, registration)?;
    Ok(ok())
}

pub async fn poll_handler(
    State(orchestrator): State<Orchestrator>,
    Path(handle): Path<String>,
) -> Json<PollAction> {
    Json(orchestrator.poll(&handle))
}

pub async fn respond_handler(
    State(orchestrator): State<Orchestrator>,
    Path(handle): Path<String>,
    Json(response): Json<ActionResponse>,
) -> ApiResult {
    orchestrator.respond(&handle, response)?;
    Ok(ok())
}

pub async fn error_handler(
    State(orchestrator): State<Orchestrator>,
    Path(handle): Path<String>,
    Json(report): Json<ErrorReport>,
) -> ApiResult {
    orchestrator.report_error(&handle, report)?;
    Ok(ok())
}

/// Store every file part of a multipart body
pub async fn upload_handler(
    State(orchestrator): State<Orchestrator>,
    Path(handle): Path<String>,
    mut multipart: Multipart,
) -> ApiResult {
    let mut stored = 0;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidRequest(format!("malformed multipart body: {}", e)))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let contents = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidRequest(format!("reading {}: {}", filename, e)))?;
        orchestrator.upload(&handle, &filename, &contents).await?;
        stored += 1;
    }

    if stored == 0 {
        return Err(Error::InvalidRequest("no file in upload".to_string()).into());
    }
    Ok(ok())
}
