//! Result Persister — one batched upsert per run, keyed on
//! `(project_id, project_slug, run_at, rank)`.
//!
//! Deployments differ in which optional columns their results table
//! carries, so a failed insert that looks like a missing column is
//! retried once with the strict required-field subset. The reported
//! `inserted` count always comes from a verification read, not from the
//! insert itself.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One condensed result row.
#[derive(Debug, Clone)]
pub struct MatchRow {
    pub project_id: Uuid,
    pub project_slug: Option<String>,
    pub program_id: String,
    pub program_name: String,
    pub source_url: Option<String>,
    pub rank: i32,
    pub score_rule: f64,
    pub score_content: f64,
    pub score_goal: f64,
    pub score_final_raw: f64,
    pub score_final_cal: f64,
    pub raw_distance: Option<f64>,
    pub subs_sector: f64,
    pub subs_stage: f64,
    pub subs_funding: f64,
    pub reasons: Vec<String>,
    pub improvements: Vec<String>,
    pub evidence_project: Vec<String>,
    pub evidence_program: Vec<String>,
    pub run_at: DateTime<Utc>,
}

/// Full column set written on the first attempt.
const ALL_COLUMNS: &str = "project_id, project_slug, program_id, program_name, source_url, rank, \
     score_rule, score_content, score_goal, score_final_raw, score_final_cal, raw_distance, \
     subs_sector, subs_stage, subs_funding, reasons, improvements, \
     evidence_project, evidence_program, run_at";

/// Strict subset retried when the table is missing an optional column.
const REQUIRED_COLUMNS: &str = "project_id, project_slug, program_id, program_name, source_url, rank, \
     score_rule, score_content, score_goal, score_final_raw, score_final_cal, raw_distance, run_at";

/// Upserts the rows of one run and returns the verified stored count for
/// the run's `(project_id, run_at)`.
pub async fn upsert_match_rows(
    pool: &PgPool,
    table: &str,
    rows: &[MatchRow],
) -> Result<i64, PersistError> {
    if rows.is_empty() {
        return Ok(0);
    }

    match run_upsert(pool, table, rows, false).await {
        Ok(()) => {}
        Err(e) if is_missing_column(&e) => {
            warn!("Results table is missing an optional column, retrying with required subset: {e}");
            run_upsert(pool, table, rows, true).await?;
        }
        Err(e) => return Err(PersistError::Database(e)),
    }

    let inserted = verify_stored(pool, table, rows[0].project_id, rows[0].run_at).await?;
    info!(
        project_id = %rows[0].project_id,
        run_at = %rows[0].run_at,
        inserted,
        "Persisted match results"
    );
    Ok(inserted)
}

async fn run_upsert(
    pool: &PgPool,
    table: &str,
    rows: &[MatchRow],
    required_only: bool,
) -> Result<(), sqlx::Error> {
    let columns = if required_only { REQUIRED_COLUMNS } else { ALL_COLUMNS };
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("INSERT INTO {table} ({columns}) "));

    qb.push_values(rows.iter(), |mut b, row| {
        b.push_bind(row.project_id)
            .push_bind(row.project_slug.clone())
            .push_bind(row.program_id.clone())
            .push_bind(row.program_name.clone())
            .push_bind(row.source_url.clone())
            .push_bind(row.rank)
            .push_bind(row.score_rule)
            .push_bind(row.score_content)
            .push_bind(row.score_goal)
            .push_bind(row.score_final_raw)
            .push_bind(row.score_final_cal)
            .push_bind(row.raw_distance);
        if !required_only {
            b.push_bind(row.subs_sector)
                .push_bind(row.subs_stage)
                .push_bind(row.subs_funding)
                .push_bind(row.reasons.clone())
                .push_bind(row.improvements.clone())
                .push_bind(row.evidence_project.clone())
                .push_bind(row.evidence_program.clone());
        }
        b.push_bind(row.run_at);
    });

    qb.push(
        " ON CONFLICT (project_id, project_slug, run_at, rank) DO UPDATE SET \
         program_id = EXCLUDED.program_id, \
         program_name = EXCLUDED.program_name, \
         source_url = EXCLUDED.source_url, \
         score_rule = EXCLUDED.score_rule, \
         score_content = EXCLUDED.score_content, \
         score_goal = EXCLUDED.score_goal, \
         score_final_raw = EXCLUDED.score_final_raw, \
         score_final_cal = EXCLUDED.score_final_cal, \
         raw_distance = EXCLUDED.raw_distance",
    );

    qb.build().execute(pool).await?;
    Ok(())
}

/// Verification read: how many rows this run actually has in the table.
async fn verify_stored(
    pool: &PgPool,
    table: &str,
    project_id: Uuid,
    run_at: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT count(*) FROM {table} WHERE project_id = $1 AND run_at = $2"
    ))
    .bind(project_id)
    .bind(run_at)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Postgres reports a missing column as SQLSTATE 42703
/// ("undefined_column").
fn is_missing_column(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("42703")
                || db.message().contains("does not exist")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_subset_matches_contract() {
        let required: Vec<&str> = REQUIRED_COLUMNS
            .split(',')
            .map(str::trim)
            .collect();
        for column in [
            "project_id",
            "project_slug",
            "program_id",
            "program_name",
            "source_url",
            "rank",
            "score_rule",
            "score_content",
            "score_goal",
            "score_final_raw",
            "score_final_cal",
            "raw_distance",
            "run_at",
        ] {
            assert!(required.contains(&column), "missing {column}");
        }
        assert_eq!(required.len(), 13);
    }

    #[test]
    fn test_all_columns_superset_of_required() {
        let all: Vec<&str> = ALL_COLUMNS.split(',').map(str::trim).collect();
        for column in REQUIRED_COLUMNS.split(',').map(str::trim) {
            assert!(all.contains(&column), "required column {column} not in full set");
        }
        assert!(all.contains(&"subs_sector"));
        assert!(all.contains(&"evidence_program"));
    }
}
