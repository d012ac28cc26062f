//! HTTP route handlers: health, calc submission, run and input-version reads.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bersn_core::{CalcEngine, CalcError, ErrorKind, RunDraft};
use bersn_storage::CalcStorage;

use super::json_error;
use super::state::AppState;

/// Map an orchestration error to its HTTP status.
fn error_status(err: &CalcError) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health<S: CalcStorage, E: CalcEngine>(
    State(state): State<Arc<AppState<S, E>>>,
) -> impl IntoResponse {
    match state.orchestrator.storage().ping().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"status": "fail", "error": e.to_string()})),
            )
        }
    }
}

/// POST /api/bersn/calc
///
/// The run executes on its own task: if the client disconnects, the
/// submission still reaches a terminal state.
pub(crate) async fn handle_calc<S: CalcStorage, E: CalcEngine>(
    State(state): State<Arc<AppState<S, E>>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    // Oversized or unreadable bodies keep the `{error}` shape.
    let body = match body {
        Ok(b) => b,
        Err(rejection) => {
            tracing::debug!(status = %rejection.status(), "calc body rejected");
            return json_error(rejection.status(), &rejection.body_text()).into_response();
        }
    };

    let parsed: serde_json::Value = if body.is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                return json_error(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e))
                    .into_response()
            }
        }
    };

    let draft = RunDraft::from_body(&parsed);
    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.submit_run(draft).await });

    match task.await {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(Err(err)) => {
            if err.is_client_error() {
                tracing::debug!(error = %err, "rejected calc submission");
            } else {
                tracing::error!(
                    error_kind = err.kind().as_str(),
                    error = %err,
                    "calc submission failed"
                );
            }
            json_error(error_status(&err), &err.to_string()).into_response()
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "calc task aborted");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "calc task aborted").into_response()
        }
    }
}

/// GET /api/bersn/runs/{calc_run_id}
pub(crate) async fn handle_get_run<S: CalcStorage, E: CalcEngine>(
    State(state): State<Arc<AppState<S, E>>>,
    Path(calc_run_id): Path<String>,
) -> Response {
    match state.orchestrator.describe_run(&calc_run_id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            json_error(StatusCode::NOT_FOUND, &err.to_string()).into_response()
        }
        Err(err) => json_error(error_status(&err), &err.to_string()).into_response(),
    }
}

/// GET /api/bersn/input-versions/{id}
pub(crate) async fn handle_get_input_version<S: CalcStorage, E: CalcEngine>(
    State(state): State<Arc<AppState<S, E>>>,
    Path(id): Path<String>,
) -> Response {
    match state.orchestrator.describe_input_version(&id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            json_error(StatusCode::NOT_FOUND, &err.to_string()).into_response()
        }
        Err(err) => json_error(error_status(&err), &err.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_maps_to_bad_request() {
        assert_eq!(
            error_status(&CalcError::validation("missing")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&CalcError::Remote {
                status_code: 503,
                body: String::new()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            error_status(&CalcError::Constraint {
                message: "dup".to_string()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
