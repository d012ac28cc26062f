//! `bersn-api serve` -- HTTP JSON API for calc-run submission.
//!
//! Endpoints:
//! - GET  /health                           - Store connectivity check
//! - POST /api/bersn/calc                   - Submit and execute a calc run
//! - GET  /api/bersn/runs/{calc_run_id}     - Run row plus result, if any
//! - GET  /api/bersn/input-versions/{id}    - Stored input snapshot
//!
//! All responses use Content-Type: application/json.

mod handlers;
mod state;

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bersn_core::{CalcEngine, Orchestrator};
use bersn_storage::CalcStorage;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use self::handlers::{
    handle_calc, handle_get_input_version, handle_get_run, handle_health, handle_not_found,
};
pub use self::state::AppState;

/// Maximum request body size: 2 MB.
pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

/// Build the application router around an orchestrator.
pub fn router<S: CalcStorage, E: CalcEngine>(orchestrator: Orchestrator<S, E>) -> Router {
    let state = Arc::new(AppState::new(orchestrator));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health::<S, E>))
        .route("/api/bersn/calc", post(handle_calc::<S, E>))
        .route("/api/bersn/runs/{calc_run_id}", get(handle_get_run::<S, E>))
        .route(
            "/api/bersn/input-versions/{id}",
            get(handle_get_input_version::<S, E>),
        )
        .fallback(handle_not_found)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves, then close
/// the store.
pub async fn serve_listener<S, E, F>(
    listener: TcpListener,
    orchestrator: Orchestrator<S, E>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: CalcStorage,
    E: CalcEngine,
    F: Future<Output = ()> + Send + 'static,
{
    let storage = Arc::clone(orchestrator.storage());
    let app = router(orchestrator);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    storage.close().await;
    tracing::info!("server shut down; store closed");
    served?;
    Ok(())
}

/// Start the HTTP server on the given port and run until Ctrl+C.
pub async fn start_server<S: CalcStorage, E: CalcEngine>(
    port: u16,
    orchestrator: Orchestrator<S, E>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "BERSn API listening");
    serve_listener(listener, orchestrator, shutdown_signal()).await
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("received shutdown signal");
}
