use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use od_core::deadline::Deadline;
use od_core::types::{AccessMode, DocumentType};
use od_dispatch::{DispatchRequest, DispatchResponse};
use od_extension::{Binding, ExtensionInfo, ExtensionStatus, PushReport};
use od_session::{DisconnectResult, SaveResult, SessionInfo};
use od_storage::{CleanupReport, RecoverOptions, RecoveredFile, RecoveryRecord, RecoveryStats};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/sessions", get(list_sessions).post(open_session))
        .route("/api/v1/sessions/{id}", get(get_session).delete(close_session))
        .route("/api/v1/sessions/{id}/touch", post(touch_session))
        .route("/api/v1/sessions/{id}/save", post(save_session))
        .route("/api/v1/sessions/{id}/disconnect", post(disconnect_session))
        .route("/api/v1/sessions/{id}/push", post(push_session))
        .route(
            "/api/v1/sessions/{id}/bindings",
            get(list_bindings).post(bind_extension).delete(unbind_all),
        )
        .route("/api/v1/sessions/{id}/bindings/{extension_id}", delete(unbind_extension))
}

pub fn dispatch_routes() -> Router<AppState> {
    Router::new().route("/api/v1/dispatch", post(dispatch))
}

pub fn recovery_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/recovery", get(list_recovery))
        .route("/api/v1/recovery/stats", get(recovery_stats))
        .route("/api/v1/recovery/cleanup", post(cleanup_recovery))
        .route("/api/v1/recovery/{id}", delete(delete_recovery))
        .route("/api/v1/recovery/{id}/recover", post(recover))
}

pub fn extension_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/extensions", get(list_extensions))
        .route("/api/v1/extensions/probe", post(probe_extensions))
        .route("/api/v1/extensions/{id}/status", get(extension_status))
        .route("/api/v1/extensions/{id}/reset", post(reset_extension))
}

/// Optional per-request deadline, `?timeout_secs=N`.
#[derive(Debug, Default, Deserialize)]
pub struct TimeoutQuery {
    pub timeout_secs: Option<u64>,
}

impl TimeoutQuery {
    fn deadline(&self) -> Deadline {
        Deadline::from_option(self.timeout_secs.map(Duration::from_secs))
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    pub path: PathBuf,
    /// Inferred from the file extension when absent.
    pub document_type: Option<DocumentType>,
    #[serde(default)]
    pub mode: AccessMode,
}

#[derive(Debug, Default, Deserialize)]
pub struct SaveRequest {
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseQuery {
    #[serde(default)]
    pub discard: bool,
}

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub extension_id: String,
    pub format: String,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "sessions": state.sessions.len(),
    }))
}

// ---- sessions ----

async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.sessions.list_active();
    Json(json!({ "count": sessions.len(), "sessions": sessions }))
}

async fn open_session(
    State(state): State<AppState>,
    Query(timeout): Query<TimeoutQuery>,
    Json(req): Json<OpenRequest>,
) -> ApiResult<(StatusCode, Json<SessionInfo>)> {
    let document_type = match req.document_type {
        Some(ty) => ty,
        None => DocumentType::from_path(&req.path).ok_or_else(|| {
            ApiError::bad_request(format!(
                "cannot infer document type of {}; pass document_type",
                req.path.display()
            ))
        })?,
    };
    let info = state
        .sessions
        .open(&req.path, document_type, req.mode, timeout.deadline())
        .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<SessionInfo>> {
    Ok(Json(state.sessions.get(&id)?))
}

async fn touch_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.sessions.touch(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn save_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(timeout): Query<TimeoutQuery>,
    Json(req): Json<SaveRequest>,
) -> ApiResult<Json<SaveResult>> {
    let result = state
        .sessions
        .save(&id, req.output_path, timeout.deadline())
        .await?;
    Ok(Json(result))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CloseQuery>,
) -> ApiResult<StatusCode> {
    state.sessions.close(&id, query.discard).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disconnect_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DisconnectResult>> {
    Ok(Json(state.sessions.handle_disconnect(&id).await?))
}

async fn push_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(timeout): Query<TimeoutQuery>,
) -> ApiResult<Json<PushReport>> {
    Ok(Json(state.sessions.push(&id, timeout.deadline()).await?))
}

async fn list_bindings(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Vec<Binding>>> {
    state.sessions.get(&id)?;
    Ok(Json(state.extensions().bindings_for(&id)))
}

async fn bind_extension(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<BindRequest>,
) -> ApiResult<(StatusCode, Json<Binding>)> {
    let binding = state
        .sessions
        .bind_extension(&id, &req.extension_id, &req.format)
        .await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

async fn unbind_all(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let removed = state.sessions.unbind_extension(&id, None);
    Json(json!({ "removed": removed }))
}

async fn unbind_extension(
    State(state): State<AppState>,
    Path((id, extension_id)): Path<(String, String)>,
) -> Json<Value> {
    let removed = state.sessions.unbind_extension(&id, Some(&extension_id));
    Json(json!({ "removed": removed }))
}

// ---- dispatch ----

async fn dispatch(
    State(state): State<AppState>,
    Query(timeout): Query<TimeoutQuery>,
    Json(req): Json<DispatchRequest>,
) -> ApiResult<Json<DispatchResponse>> {
    Ok(Json(state.dispatcher.dispatch(req, timeout.deadline()).await?))
}

// ---- recovery ----

async fn list_recovery(State(state): State<AppState>) -> Json<Value> {
    let records: Vec<RecoveryRecord> = state.recovery().list();
    Json(json!({ "count": records.len(), "records": records }))
}

async fn recovery_stats(State(state): State<AppState>) -> Json<RecoveryStats> {
    Json(state.recovery().stats())
}

async fn cleanup_recovery(
    State(state): State<AppState>,
    Query(timeout): Query<TimeoutQuery>,
) -> ApiResult<Json<CleanupReport>> {
    let deadline = timeout
        .deadline()
        .or(state.sessions.config().operation_timeout());
    Ok(Json(state.recovery().cleanup(deadline).await?))
}

async fn recover(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(timeout): Query<TimeoutQuery>,
    Json(options): Json<RecoverOptions>,
) -> ApiResult<Json<RecoveredFile>> {
    let deadline = timeout
        .deadline()
        .or(state.sessions.config().operation_timeout());
    Ok(Json(state.recovery().recover(&id, options, deadline).await?))
}

async fn delete_recovery(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let deleted = state.recovery().delete(&id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

// ---- extensions ----

async fn list_extensions(State(state): State<AppState>) -> Json<Vec<ExtensionInfo>> {
    Json(state.extensions().list_extensions())
}

async fn probe_extensions(State(state): State<AppState>) -> Json<Vec<ExtensionInfo>> {
    state.extensions().probe_all().await;
    Json(state.extensions().list_extensions())
}

async fn extension_status(State(state): State<AppState>, Path(id): Path<String>) -> Json<ExtensionStatus> {
    Json(state.extensions().status(&id))
}

/// Operator action: bring an extension back after its restart limit was hit.
async fn reset_extension(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<ExtensionStatus>> {
    Ok(Json(state.extensions().reset(&id).await?))
}
