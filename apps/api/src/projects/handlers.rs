//! Axum route handlers for project intake.

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::project_slug_exists;
use crate::errors::AppError;
use crate::matcher::service::run_match;
use crate::models::project::{slugify, Project, ProjectIn};
use crate::models::stages::{is_valid_stage, normalize_stage, STAGE_LADDER};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MatchingSummary {
    pub inserted: i64,
    pub run_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateProjectResponse {
    pub project: Project,
    pub matching: MatchingSummary,
}

/// POST /projects
///
/// Persists the project, then immediately runs the matcher. A matcher
/// failure never fails project creation — it is reported in
/// `matching.error` instead.
pub async fn handle_create_project(
    State(state): State<AppState>,
    Json(input): Json<ProjectIn>,
) -> Result<Json<CreateProjectResponse>, AppError> {
    if input.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if input.description.trim().is_empty() {
        return Err(AppError::Validation(
            "description cannot be empty".to_string(),
        ));
    }

    let stage = normalize_stage(&input.stage);
    if !is_valid_stage(&stage) {
        return Err(AppError::UnprocessableEntity(format!(
            "Invalid 'stage' value. Allowed: {}",
            STAGE_LADDER.join(", ")
        )));
    }

    let slug = unique_project_slug(&state, &input.name).await?;

    let project = Project {
        id: Uuid::new_v4(),
        slug: Some(slug.clone()),
        name: input.name.trim().to_string(),
        description: input.description.trim().to_string(),
        stage,
        sectors: input.sectors,
        goals: input.goals,
        funding_need: input.funding_need.unwrap_or(0.0),
    };

    sqlx::query(
        "INSERT INTO projects (id, slug, name, description, stage, sectors, goals, funding_need, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(project.id)
    .bind(&slug)
    .bind(&project.name)
    .bind(&project.description)
    .bind(&project.stage)
    .bind(json!(project.sectors))
    .bind(json!(project.goals))
    .bind(project.funding_need)
    .bind(Utc::now())
    .execute(&state.db)
    .await?;

    info!(project_id = %project.id, slug = %slug, "Project created");

    // Matching runs synchronously on creation; its failure is reported,
    // never propagated.
    let matching = match run_match(
        &state.db,
        &state.store,
        &state.llm,
        &state.config,
        &project,
        state.config.match_top_k,
        state.config.match_calibration,
    )
    .await
    {
        Ok(outcome) => MatchingSummary {
            inserted: outcome.inserted,
            run_at: Some(outcome.run_at),
            error: outcome.error,
        },
        Err(e) => {
            warn!(project_id = %project.id, "Matching failed on creation: {e}");
            MatchingSummary {
                inserted: 0,
                run_at: None,
                error: Some(e.to_string()),
            }
        }
    };

    Ok(Json(CreateProjectResponse { project, matching }))
}

/// Derives a slug from the name and de-duplicates against existing
/// projects with `-2`, `-3`, ... suffixes.
async fn unique_project_slug(state: &AppState, name: &str) -> Result<String, AppError> {
    let base = slugify(name);
    let mut slug = base.clone();
    let mut suffix = 2;
    while project_slug_exists(&state.db, &slug)
        .await
        .map_err(AppError::Internal)?
    {
        slug = format!("{base}-{suffix}");
        suffix += 1;
    }
    Ok(slug)
}
