//! HTTP API routes.

use crate::dispatch::{FetchRequest, Operation, RequestDispatcher};
use crate::error::ScreenerError;
use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<RequestDispatcher>,
}

impl AppState {
    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(health_check))
        .route("/status", get(status))
        // Fetch
        .route("/fetch", post(fetch))
        // Session
        .route("/restart", post(restart_session))
        // Config
        .route("/refresh_config", post(refresh_config))
        .route("/config", get(get_config))
        // Listings
        .route("/screeners", get(list_screeners))
        .route("/indices", get(list_indices))
        // Tagged operations
        .route("/dispatch", post(dispatch))
        .with_state(state)
}

fn ok(data: Value) -> Json<Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data
    }))
}

async fn run(state: &AppState, op: Operation) -> Result<Json<Value>, ScreenerError> {
    state.dispatcher.dispatch(op).await.map(ok)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ScreenerError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ScreenerError::InvalidRequest(e.body_text()))
}

// ============ Health Check ============

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "zero-screener",
        "version": env!("CARGO_PKG_VERSION"),
        "session_state": state.dispatcher.session().state()
    }))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.dispatcher.status().await;
    Json(serde_json::json!({
        "success": true,
        "data": status
    }))
}

// ============ Fetch ============

async fn fetch(
    State(state): State<AppState>,
    payload: Result<Json<FetchRequest>, JsonRejection>,
) -> Result<Json<Value>, ScreenerError> {
    let request = body(payload)?;
    run(&state, Operation::FetchScreenerData(request)).await
}

// ============ Session ============

async fn restart_session(State(state): State<AppState>) -> Result<Json<Value>, ScreenerError> {
    run(&state, Operation::RefreshScreenerSession).await
}

// ============ Config ============

async fn refresh_config(State(state): State<AppState>) -> Result<Json<Value>, ScreenerError> {
    run(&state, Operation::RefreshScreenerConfig).await
}

async fn get_config(State(state): State<AppState>) -> Result<Json<Value>, ScreenerError> {
    run(&state, Operation::GetScreenerConfig).await
}

// ============ Listings ============

async fn list_screeners(State(state): State<AppState>) -> Result<Json<Value>, ScreenerError> {
    run(&state, Operation::ListScreenerTypes).await
}

async fn list_indices(State(state): State<AppState>) -> Result<Json<Value>, ScreenerError> {
    run(&state, Operation::ListScreenerIndices).await
}

// ============ Dispatch ============

async fn dispatch(
    State(state): State<AppState>,
    payload: Result<Json<Operation>, JsonRejection>,
) -> Result<Json<Value>, ScreenerError> {
    let op = body(payload)?;
    run(&state, op).await
}
