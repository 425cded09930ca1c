//! QA analysis review endpoints: clearing, answer edits and human reviews

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::controls;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{CallRecord, HumanReview, QaAnalysis};
use crate::AppState;

/// POST /calls/:call_id/qa/clear
pub async fn clear_qa_analysis(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> ApiResult<Json<CallRecord>> {
    let call = controls::clear_qa_analysis(&state.db, &state.event_bus, &call_id).await?;
    Ok(Json(call))
}

#[derive(Debug, Deserialize)]
pub struct EditAnswerRequest {
    pub question_id: String,
    pub answer: String,
    pub justification: Option<String>,
}

/// POST /calls/:call_id/qa/answer
pub async fn edit_answer(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(request): Json<EditAnswerRequest>,
) -> ApiResult<Json<QaAnalysis>> {
    if request.answer.trim().is_empty() {
        return Err(ApiError::BadRequest("Answer must not be empty".to_string()));
    }

    let analysis = controls::edit_answer(
        &state.db,
        &call_id,
        &request.question_id,
        &request.answer,
        request.justification.as_deref(),
    )
    .await?;

    Ok(Json(analysis))
}

/// Human review upload: an explicit question-id -> answers map validated
/// here at the boundary
#[derive(Debug, Deserialize)]
pub struct HumanReviewRequest {
    pub review_id: String,
    pub activity_name: String,
    pub answers: BTreeMap<String, Vec<String>>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
}

/// POST /calls/:call_id/qa/human-review
pub async fn save_human_review(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(request): Json<HumanReviewRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if request.review_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "review_id must not be empty".to_string(),
        ));
    }

    let review = HumanReview {
        review_id: request.review_id,
        activity_name: request.activity_name,
        answers: request.answers,
        reviewed_by: request.reviewed_by,
        reviewed_at: request.reviewed_at,
        fetched_at: Utc::now(),
    };

    db::transcripts::save_human_review(&state.db, &call_id, &review).await?;

    Ok(Json(serde_json::json!({ "saved": true })))
}

/// Build review routes
pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/calls/:call_id/qa/clear", post(clear_qa_analysis))
        .route("/calls/:call_id/qa/answer", post(edit_answer))
        .route("/calls/:call_id/qa/human-review", post(save_human_review))
}
