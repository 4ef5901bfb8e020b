//! Status and reporting endpoints

use super::ApiError;
use crate::junit;
use crate::state::{Orchestrator, StatusReport};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde_json::json;

pub async fn root_handler() -> Redirect {
    Redirect::to("/status")
}

pub async fn status_handler(State(orchestrator): State<Orchestrator>) -> Json<StatusReport> {
    Json(orchestrator.status())
}

pub async fn junit_handler(State(orchestrator): State<Orchestrator>) -> Result<Response, ApiError> {
    let xml = junit::render(&orchestrator.suites())?;
    Ok(([(header::CONTENT_TYPE, "application/xml")], xml).into_response())
}

pub async fn suite_handler(
    State(orchestrator): State<Orchestrator>,
    Path(suite_id): Path<String>,
) -> Response {
    match orchestrator.suite_info(&suite_id) {
        Some(info) => Json(info).into_response(),
        None => not_found(format!("No test suite {}", suite_id)),
    }
}

pub async fn test_case_handler(
    State(orchestrator): State<Orchestrator>,
    Path(test_case_id): Path<String>,
) -> Response {
    match orchestrator.test_case_detail(&test_case_id) {
        Some(detail) => Json(detail).into_response(),
        None => not_found(format!("No test case {}", test_case_id)),
    }
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}
