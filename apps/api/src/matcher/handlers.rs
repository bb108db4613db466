//! Axum route handlers for the matcher: on-demand re-runs and reads of
//! the latest persisted run.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::fetch_project;
use crate::errors::AppError;
use crate::matcher::service::{run_match, MatchMeta, MatchResultBlock};
use crate::state::AppState;

const MAX_TOP_K: usize = 50;
const DEFAULT_MATCH_LIMIT: i64 = 10;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RunMatchParams {
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RunMatchResponse {
    pub ok: bool,
    pub project_id: Uuid,
    pub run_at: String,
    pub inserted_rows: i64,
    pub results: Vec<MatchResultBlock>,
    pub meta: MatchMeta,
}

#[derive(Debug, Deserialize)]
pub struct MatchListParams {
    pub limit: Option<i64>,
}

/// One persisted result row as returned by the read endpoint.
#[derive(Debug, Serialize, FromRow)]
pub struct StoredMatchRow {
    pub program_id: String,
    pub program_name: String,
    pub source_url: Option<String>,
    pub rank: i32,
    pub run_at: DateTime<Utc>,
    pub score_rule: f64,
    pub score_content: f64,
    pub score_goal: f64,
    pub score_final_raw: f64,
    pub score_final_cal: f64,
    pub raw_distance: Option<f64>,
    pub subs_sector: Option<f64>,
    pub subs_stage: Option<f64>,
    pub subs_funding: Option<f64>,
    pub reasons: Option<Vec<String>>,
    pub improvements: Option<Vec<String>>,
    pub evidence_project: Option<Vec<String>>,
    pub evidence_program: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct MatchListResponse {
    pub matches: Vec<StoredMatchRow>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /projects/:project_id/run_match?top_k=K
///
/// Re-runs the matcher for a stored project and persists a fresh run.
pub async fn handle_run_match(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(params): Query<RunMatchParams>,
) -> Result<Json<RunMatchResponse>, AppError> {
    let row = fetch_project(&state.db, project_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("Project {project_id} not found")))?;
    let project = row.into_project();

    let top_k = params
        .top_k
        .unwrap_or(state.config.match_top_k)
        .clamp(1, MAX_TOP_K);

    let outcome = run_match(
        &state.db,
        &state.store,
        &state.llm,
        &state.config,
        &project,
        top_k,
        state.config.match_calibration,
    )
    .await?;

    Ok(Json(RunMatchResponse {
        ok: true,
        project_id,
        run_at: outcome.run_at,
        inserted_rows: outcome.inserted,
        results: outcome.payload.results,
        meta: outcome.payload.meta,
    }))
}

/// GET /projects/:project_id/matches?limit=N
///
/// Returns the persisted rows of the most recent run, rank ascending.
pub async fn handle_get_matches(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(params): Query<MatchListParams>,
) -> Result<Json<MatchListResponse>, AppError> {
    let table = &state.config.match_table;
    let limit = params.limit.unwrap_or(DEFAULT_MATCH_LIMIT).clamp(1, 100);

    let latest: Option<DateTime<Utc>> = sqlx::query_scalar(&format!(
        "SELECT run_at FROM {table} WHERE project_id = $1 ORDER BY run_at DESC LIMIT 1"
    ))
    .bind(project_id)
    .fetch_optional(&state.db)
    .await?;

    let last_run = match latest {
        Some(run_at) => run_at,
        None => return Ok(Json(MatchListResponse { matches: vec![] })),
    };

    let matches = sqlx::query_as::<_, StoredMatchRow>(&format!(
        "SELECT program_id, program_name, source_url, rank, run_at, \
                score_rule, score_content, score_goal, score_final_raw, score_final_cal, \
                raw_distance, subs_sector, subs_stage, subs_funding, \
                reasons, improvements, evidence_project, evidence_program \
         FROM {table} \
         WHERE project_id = $1 AND run_at = $2 \
         ORDER BY rank ASC \
         LIMIT $3"
    ))
    .bind(project_id)
    .bind(last_run)
    .bind(limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(MatchListResponse { matches }))
}
