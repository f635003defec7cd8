use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::error::PipelineError;
use crate::orchestrator;
use crate::state::AppState;

pub async fn inbound(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers.get("content-type").and_then(|v| v.to_str().ok());

    let outcome = tokio::time::timeout(state.config.request_deadline(), orchestrator::handle_webhook(&state, &body, content_type)).await;

    match outcome {
        Ok(processing_outcome) => match processing_outcome.into_pipeline_result() {
            Ok(response_body) => (StatusCode::OK, response_body),
            Err(err) => map_pipeline_error(err),
        },
        Err(_) => (StatusCode::OK, "deadline exceeded, processing abandoned".to_owned()),
    }
}

/// The HTTP layer's only job once an outcome resolves to an error: mapping
/// `PipelineError` variants to status codes.
fn map_pipeline_error(err: PipelineError) -> (StatusCode, String) {
    match err {
        PipelineError::Input(msg) => (StatusCode::BAD_REQUEST, msg),
        PipelineError::StoreFatal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        PipelineError::Fatal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
    }
}
