//! Defines the Axum API routes and handlers.

use crate::orchestrator::{ControlError, JobSnapshot};
use crate::web::models::InfoResponse;
use crate::web::printer_channel::PrinterRequest;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::{mpsc::Sender, oneshot, watch};

pub struct AppStateInner {
    pub printer_tx: Sender<PrinterRequest>,
    pub snapshot: watch::Receiver<JobSnapshot>,
    pub printer_name: String,
    pub office_name: String,
}
pub type AppState = Arc<AppStateInner>;

/// Helper to create a JSON error response with a message and status code
fn json_error(message: &str, status: StatusCode) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/info", get(get_info))
        .route("/api/v1/status", get(get_info))
        .route("/api/v1/start", post(start_handler))
        .route("/api/v1/reschedule", post(reschedule_handler))
        .route("/api/v1/cancel", post(cancel_handler))
        .with_state(state)
}

/// Handler returning the latest orchestrator snapshot. Never waits on a tick.
async fn get_info(State(state): State<AppState>) -> axum::response::Response {
    let snapshot = state.snapshot.borrow().clone();
    let info = InfoResponse::from_snapshot(&snapshot, &state.printer_name, &state.office_name);
    (StatusCode::OK, Json(info)).into_response()
}

/// Forward a control request to the orchestrator and map its answer.
async fn dispatch(
    state: &AppState,
    request: impl FnOnce(oneshot::Sender<Result<(), ControlError>>) -> PrinterRequest,
) -> axum::response::Response {
    let (resp_tx, resp_rx) = oneshot::channel();
    if state.printer_tx.send(request(resp_tx)).await.is_err() {
        return json_error("Internal error", StatusCode::INTERNAL_SERVER_ERROR);
    }
    match resp_rx.await {
        Ok(Ok(())) => (StatusCode::OK, Json(serde_json::json!({ "result": "ok" }))).into_response(),
        Ok(Err(e @ ControlError::Remote(_))) => json_error(&e.to_string(), StatusCode::BAD_GATEWAY),
        Ok(Err(e)) => json_error(&e.to_string(), StatusCode::CONFLICT),
        Err(_) => json_error("Internal error", StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Confirm the job waiting for the device signal.
async fn start_handler(State(state): State<AppState>) -> axum::response::Response {
    dispatch(&state, |respond_to| PrinterRequest::Start { respond_to }).await
}

/// Announce the printer to the remote queue again.
async fn reschedule_handler(State(state): State<AppState>) -> axum::response::Response {
    dispatch(&state, |respond_to| PrinterRequest::Reschedule { respond_to }).await
}

/// Cancel the active job.
async fn cancel_handler(State(state): State<AppState>) -> axum::response::Response {
    dispatch(&state, |respond_to| PrinterRequest::Cancel { respond_to }).await
}
