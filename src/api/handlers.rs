//! HTTP request handlers

use super::sse::status_stream;
use super::types::{
    CombatantListResponse, CombatantResponse, CreateRecordRequest, CreateRecordResponse,
    ErrorResponse, MergeResponse, RecordListResponse, RecordsQuery, SuccessResponse, TurnResponse,
};
use super::AppState;
use crate::bridge::{BridgeError, StatusInfo};
use crate::capability::{CapabilityError, CapabilityErrorKind, LocalSession};
use crate::model::{CombatantEdit, NewCombatant, RecordRef, Target};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Bridge status
        .route("/api/status", get(get_status))
        .route("/api/status/stream", get(stream_status))
        // Shared records
        .route("/api/records", get(list_records).post(create_record))
        .route("/api/records/merge", post(merge_record))
        // Connection lifecycle
        .route("/api/connect", post(connect))
        .route("/api/disconnect", post(disconnect))
        // In-process tracker
        .route("/api/combatants", get(list_combatants).post(add_combatant))
        .route(
            "/api/combatants/:id",
            patch(edit_combatant).delete(remove_combatant),
        )
        .route("/api/combatants/:id/activate", post(activate_combatant))
        .route("/api/turn/next", post(next_turn))
        .route("/api/encounter/reset", post(reset_encounter))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Status
// ============================================================

async fn get_status(State(state): State<AppState>) -> Json<StatusInfo> {
    Json(state.bridge.status())
}

async fn stream_status(State(state): State<AppState>) -> impl IntoResponse {
    status_stream(state.bridge.watch_status())
}

// ============================================================
// Shared records
// ============================================================

async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<RecordsQuery>,
) -> Result<Json<RecordListResponse>, AppError> {
    let records = state.bridge.fetch_active_records(query.scope).await?;
    Ok(Json(RecordListResponse { records }))
}

async fn create_record(
    State(state): State<AppState>,
    Json(req): Json<CreateRecordRequest>,
) -> Result<Json<CreateRecordResponse>, AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Record name is required".to_string()));
    }
    let record_id = state.bridge.create_record(req.scope, name).await?;
    Ok(Json(CreateRecordResponse { record_id }))
}

async fn merge_record(
    State(state): State<AppState>,
    Json(target): Json<RecordRef>,
) -> Result<Json<MergeResponse>, AppError> {
    let appended = state.bridge.merge_record(target).await?;
    Ok(Json(MergeResponse { appended }))
}

// ============================================================
// Connection lifecycle
// ============================================================

async fn connect(
    State(state): State<AppState>,
    Json(target): Json<RecordRef>,
) -> Result<Json<StatusInfo>, AppError> {
    Ok(Json(state.bridge.connect(target).await?))
}

async fn disconnect(State(state): State<AppState>) -> Result<Json<SuccessResponse>, AppError> {
    state.bridge.disconnect().await?;
    Ok(Json(SuccessResponse::ok()))
}

// ============================================================
// In-process tracker
// ============================================================

async fn list_combatants(
    State(state): State<AppState>,
) -> Result<Json<CombatantListResponse>, AppError> {
    let combatants = state
        .tracker
        .list_combatants()
        .await
        .map_err(AppError::from_tracker)?;
    let round = state
        .tracker
        .current_round()
        .await
        .map_err(AppError::from_tracker)?;
    Ok(Json(CombatantListResponse { combatants, round }))
}

async fn add_combatant(
    State(state): State<AppState>,
    Json(mut combatant): Json<NewCombatant>,
) -> Result<Json<CombatantResponse>, AppError> {
    combatant.name = combatant.name.trim().to_string();
    if combatant.name.is_empty() {
        return Err(AppError::BadRequest("Combatant name is required".to_string()));
    }
    let id = state
        .tracker
        .add(combatant)
        .await
        .map_err(AppError::from_tracker)?;
    Ok(Json(CombatantResponse { id }))
}

async fn edit_combatant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edit): Json<CombatantEdit>,
) -> Result<Json<SuccessResponse>, AppError> {
    if edit.writes().is_empty() {
        return Err(AppError::BadRequest("Nothing to change".to_string()));
    }
    state
        .tracker
        .edit(&id, &edit)
        .map_err(AppError::from_tracker)?;
    Ok(Json(SuccessResponse::ok()))
}

async fn remove_combatant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .tracker
        .remove(&Target::Id(id))
        .await
        .map_err(AppError::from_tracker)?;
    Ok(Json(SuccessResponse::ok()))
}

async fn activate_combatant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .tracker
        .set_active(&Target::Id(id))
        .await
        .map_err(AppError::from_tracker)?;
    Ok(Json(SuccessResponse::ok()))
}

async fn next_turn(State(state): State<AppState>) -> Result<Json<TurnResponse>, AppError> {
    let active = state.tracker.advance_turn().map_err(AppError::from_tracker)?;
    let round = state
        .tracker
        .current_round()
        .await
        .map_err(AppError::from_tracker)?;
    Ok(Json(TurnResponse { active, round }))
}

async fn reset_encounter(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.tracker.reset().map_err(AppError::from_tracker)?;
    Ok(Json(SuccessResponse::ok()))
}

async fn get_version() -> &'static str {
    concat!("initiative-bridge ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    BadGateway(String),
    Unavailable(String),
}

impl AppError {
    /// Failures of the in-process tracker
    fn from_tracker(error: CapabilityError) -> Self {
        match error.kind {
            CapabilityErrorKind::Unavailable => AppError::Unavailable(error.message),
            CapabilityErrorKind::NotFound => AppError::NotFound(error.message),
            _ => AppError::BadRequest(error.message),
        }
    }
}

impl From<BridgeError> for AppError {
    fn from(error: BridgeError) -> Self {
        let message = error.to_string();
        match error {
            BridgeError::SessionUnavailable | BridgeError::Stopped => AppError::Unavailable(message),
            BridgeError::RecordNotFound(_) => AppError::NotFound(message),
            BridgeError::Capability(e) => match e.kind {
                CapabilityErrorKind::NotFound => AppError::NotFound(message),
                CapabilityErrorKind::Unavailable => AppError::Unavailable(message),
                _ => AppError::BadGateway(message),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
