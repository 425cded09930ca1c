//! Aggregate statistics read API
//!
//! All numbers come straight from the incrementally maintained rows;
//! averages and pass rates are derived at read time, never stored.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

fn parse_uuid_param(raw: &str, name: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid {}: {}", name, raw)))
}

#[derive(Debug, Serialize)]
pub struct AgentGroupRow {
    pub question_group_id: Uuid,
    pub group_name: String,
    pub analyzed_count: i64,
    pub average_score: i64,
    pub total_duration: i64,
}

#[derive(Debug, Serialize)]
pub struct AgentOverview {
    pub agent_id: Uuid,
    pub groups: Vec<AgentGroupRow>,
    pub analyzed_count: i64,
    pub average_score: i64,
    pub total_duration: i64,
}

/// GET /stats/agents/:agent_id
pub async fn agent_overview(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentOverview>> {
    let agent_id = parse_uuid_param(&agent_id, "agent id")?;
    let rows = db::stats::list_call_stats_by_agent(&state.db, agent_id).await?;

    let mut groups = Vec::with_capacity(rows.len());
    let mut analyzed_count = 0i64;
    let mut total_score = 0i64;
    let mut total_duration = 0i64;

    for row in &rows {
        let group_name = db::rubric::get_group(&state.db, row.question_group_id)
            .await?
            .map(|g| g.display_name)
            .unwrap_or_else(|| "Unknown".to_string());

        groups.push(AgentGroupRow {
            question_group_id: row.question_group_id,
            group_name,
            analyzed_count: row.analyzed_count,
            average_score: row.average_score(),
            total_duration: row.total_duration,
        });

        analyzed_count += row.analyzed_count;
        total_score += row.total_score;
        total_duration += row.total_duration;
    }

    let average_score = if analyzed_count > 0 {
        ((total_score as f64) / (analyzed_count as f64)).round() as i64
    } else {
        0
    };

    Ok(Json(AgentOverview {
        agent_id,
        groups,
        analyzed_count,
        average_score,
        total_duration,
    }))
}

#[derive(Debug, Serialize)]
pub struct RankingRow {
    pub agent_id: Uuid,
    pub agent_name: String,
    pub analyzed_count: i64,
    pub average_score: i64,
    pub total_duration: i64,
}

/// GET /stats/ranking - agents by average score, best first
pub async fn agent_ranking(State(state): State<AppState>) -> ApiResult<Json<Vec<RankingRow>>> {
    let rows = db::stats::list_all_call_stats(&state.db).await?;

    let mut by_agent: HashMap<Uuid, (i64, i64, i64)> = HashMap::new();
    for row in rows {
        let entry = by_agent.entry(row.agent_id).or_insert((0, 0, 0));
        entry.0 += row.analyzed_count;
        entry.1 += row.total_score;
        entry.2 += row.total_duration;
    }

    let mut ranking = Vec::with_capacity(by_agent.len());
    for (agent_id, (analyzed_count, total_score, total_duration)) in by_agent {
        let agent_name = db::agents::get(&state.db, agent_id)
            .await?
            .map(|a| a.display_name)
            .unwrap_or_else(|| "Unknown".to_string());

        let average_score = if analyzed_count > 0 {
            ((total_score as f64) / (analyzed_count as f64)).round() as i64
        } else {
            0
        };

        ranking.push(RankingRow {
            agent_id,
            agent_name,
            analyzed_count,
            average_score,
            total_duration,
        });
    }

    ranking.sort_by(|a, b| b.average_score.cmp(&a.average_score));

    Ok(Json(ranking))
}

#[derive(Debug, Serialize)]
pub struct QuestionPerformanceRow {
    pub question_id: String,
    pub question_text: String,
    pub sort_order: i64,
    pub tak_count: i64,
    pub nie_count: i64,
    pub total_count: i64,
    pub pass_rate: i64,
}

/// GET /stats/questions/:group_id - per-question pass rates, worst first
pub async fn question_performance(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<Json<Vec<QuestionPerformanceRow>>> {
    let group_id = parse_uuid_param(&group_id, "group id")?;

    let rows = db::stats::list_question_stats_by_group(&state.db, group_id).await?;
    let questions = db::rubric::list_active_questions(&state.db, group_id).await?;
    let question_map: HashMap<&str, &crate::models::RubricQuestion> = questions
        .iter()
        .map(|q| (q.question_id.as_str(), q))
        .collect();

    let mut performance: Vec<QuestionPerformanceRow> = rows
        .iter()
        .map(|row| {
            let question = question_map.get(row.question_id.as_str());
            QuestionPerformanceRow {
                question_id: row.question_id.clone(),
                question_text: question
                    .map(|q| q.question.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                sort_order: question.map(|q| q.sort_order).unwrap_or(999),
                tak_count: row.tak_count,
                nie_count: row.nie_count,
                total_count: row.total_count,
                pass_rate: row.pass_rate(),
            }
        })
        .collect();

    performance.sort_by(|a, b| a.pass_rate.cmp(&b.pass_rate));

    Ok(Json(performance))
}

#[derive(Debug, Serialize)]
pub struct WorstQuestion {
    pub question_id: String,
    pub question_text: String,
    pub pass_rate: i64,
    pub total_count: i64,
}

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    pub analyzed_count: i64,
    pub average_score: i64,
    pub worst_questions: Vec<WorstQuestion>,
}

/// GET /stats/dashboard - global totals plus the five worst questions
pub async fn dashboard_summary(
    State(state): State<AppState>,
) -> ApiResult<Json<DashboardSummary>> {
    let call_stats = db::stats::list_all_call_stats(&state.db).await?;
    let question_stats = db::stats::list_all_question_stats(&state.db).await?;

    let analyzed_count: i64 = call_stats.iter().map(|r| r.analyzed_count).sum();
    let total_score: i64 = call_stats.iter().map(|r| r.total_score).sum();
    let average_score = if analyzed_count > 0 {
        ((total_score as f64) / (analyzed_count as f64)).round() as i64
    } else {
        0
    };

    let mut scored: Vec<_> = question_stats
        .into_iter()
        .filter(|qs| qs.total_count > 0)
        .collect();
    scored.sort_by(|a, b| a.pass_rate().cmp(&b.pass_rate()));

    let mut worst_questions = Vec::new();
    for qs in scored.into_iter().take(5) {
        let question_text = db::rubric::list_active_questions(&state.db, qs.group_id)
            .await?
            .into_iter()
            .find(|q| q.question_id == qs.question_id)
            .map(|q| q.question)
            .unwrap_or_else(|| "Unknown".to_string());

        worst_questions.push(WorstQuestion {
            question_id: qs.question_id.clone(),
            question_text,
            pass_rate: qs.pass_rate(),
            total_count: qs.total_count,
        });
    }

    Ok(Json(DashboardSummary {
        analyzed_count,
        average_score,
        worst_questions,
    }))
}

/// Build statistics routes
pub fn stats_routes() -> Router<AppState> {
    Router::new()
        .route("/stats/agents/:agent_id", get(agent_overview))
        .route("/stats/ranking", get(agent_ranking))
        .route("/stats/questions/:group_id", get(question_performance))
        .route("/stats/dashboard", get(dashboard_summary))
}
