//! Postgres bootstrap and the project-row shape read back for match runs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::models::project::{coerce_str_list, Project};

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// A project row as stored. `sectors` and `goals` are JSONB and may hold
/// arrays or legacy string encodings; `into_project` normalizes them.
#[derive(Debug, FromRow)]
pub struct ProjectRow {
    pub id: uuid::Uuid,
    pub slug: Option<String>,
    pub name: String,
    pub description: String,
    pub stage: String,
    pub sectors: Value,
    pub goals: Value,
    pub funding_need: Option<f64>,
    #[allow(dead_code)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProjectRow {
    pub fn into_project(self) -> Project {
        Project {
            id: self.id,
            slug: self.slug,
            name: self.name,
            description: self.description,
            stage: self.stage,
            sectors: coerce_str_list(&self.sectors),
            goals: coerce_str_list(&self.goals),
            funding_need: self.funding_need.unwrap_or(0.0),
        }
    }
}

/// Fetches one project by id.
pub async fn fetch_project(pool: &PgPool, project_id: uuid::Uuid) -> Result<Option<ProjectRow>> {
    let row = sqlx::query_as::<_, ProjectRow>(
        "SELECT id, slug, name, description, stage, sectors, goals, funding_need, updated_at \
         FROM projects WHERE id = $1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// True when a project already claims the slug.
pub async fn project_slug_exists(pool: &PgPool, slug: &str) -> Result<bool> {
    let existing: Option<uuid::Uuid> =
        sqlx::query_scalar("SELECT id FROM projects WHERE slug = $1 LIMIT 1")
            .bind(slug)
            .fetch_optional(pool)
            .await?;
    Ok(existing.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_into_project_coerces_jsonb_shapes() {
        let row = ProjectRow {
            id: Uuid::nil(),
            slug: Some("p".to_string()),
            name: "P".to_string(),
            description: "d".to_string(),
            stage: "MVP".to_string(),
            sectors: json!(["fintech", "health"]),
            goals: json!("scale, hire"),
            funding_need: None,
            updated_at: None,
        };
        let project = row.into_project();
        assert_eq!(project.sectors, vec!["fintech", "health"]);
        assert_eq!(project.goals, vec!["scale", "hire"]);
        assert_eq!(project.funding_need, 0.0);
    }
}
