//! Call read API and manual pipeline controls

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::controls;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{CallRecord, Transcript};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Maximum rows returned (default 100)
    pub limit: Option<u32>,
}

/// GET /calls
pub async fn list_calls(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<CallRecord>>> {
    let limit = params.limit.unwrap_or(100).min(500);
    let calls = db::calls::list_recent(&state.db, limit).await?;
    Ok(Json(calls))
}

/// Call detail payload: the record plus its transcript when present
#[derive(Debug, Serialize)]
pub struct CallDetail {
    #[serde(flatten)]
    pub call: CallRecord,
    pub transcript: Option<Transcript>,
}

/// GET /calls/:call_id
pub async fn get_call(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> ApiResult<Json<CallDetail>> {
    let call = db::calls::get_by_call_id(&state.db, &call_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Call not found: {}", call_id)))?;

    let transcript = db::transcripts::get_by_call_id(&state.db, &call_id).await?;

    Ok(Json(CallDetail { call, transcript }))
}

/// POST /calls/:call_id/retry
pub async fn retry_call(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> ApiResult<Json<CallRecord>> {
    let call = controls::retry_call(&state.db, &call_id).await?;
    Ok(Json(call))
}

/// POST /calls/:call_id/reprocess
pub async fn reprocess_call(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> ApiResult<Json<CallRecord>> {
    let call = controls::reprocess_call(&state.db, &state.event_bus, &call_id).await?;
    Ok(Json(call))
}

/// Build call routes
pub fn call_routes() -> Router<AppState> {
    Router::new()
        .route("/calls", get(list_calls))
        .route("/calls/:call_id", get(get_call))
        .route("/calls/:call_id/retry", post(retry_call))
        .route("/calls/:call_id/reprocess", post(reprocess_call))
}
