//! Match Orchestrator — runs the full pipeline for one project and
//! persists the outcome.
//!
//! Flow: validate input → retrieve broad pool → LLM-judged granular
//! ranking → truncate to top-K → calibrate → derive violations → pack
//! payload → persist → verify.
//!
//! `run_at` is captured once per run; every row and the payload carry the
//! identical UTC ISO-8601 instant (with `Z` suffix).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::matcher::calibrate::{apply_calibration, Calibration};
use crate::matcher::error::MatchError;
use crate::matcher::persist::{upsert_match_rows, MatchRow};
use crate::matcher::retrieval::{retrieve_candidates, retrieval_pool_size};
use crate::matcher::scoring::{rank_candidates, RankedCandidate, SubScores, Weights};
use crate::matcher::violations::{derive_violations, Violation};
use crate::models::program::{identify_program, meta_str, meta_str_list};
use crate::models::project::Project;
use crate::vector_store::VectorStore;

/// Overall deadline for retrieval plus ranking of one run.
const RUN_DEADLINE_SECS: u64 = 900;

/// Evidence lists carry at most this many entries per side.
const MAX_EVIDENCE: usize = 2;
const MAX_EVIDENCE_GOALS: usize = 5;

// ────────────────────────────────────────────────────────────────────────────
// Payload shapes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MatchPayload {
    pub project_ref: ProjectRef,
    pub project: ProjectSnapshot,
    pub meta: MatchMeta,
    pub results: Vec<MatchResultBlock>,
}

#[derive(Debug, Serialize)]
pub struct ProjectRef {
    pub id: Uuid,
    pub slug: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectSnapshot {
    pub name: String,
    pub description: String,
    pub sectors: Vec<String>,
    pub stage: String,
    pub funding_need: f64,
    pub goals: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MatchMeta {
    pub run_at: String,
    pub weights: Weights,
    pub retrieval: RetrievalMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationMeta>,
    pub models: ModelsMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RetrievalMeta {
    pub collection: String,
    pub metric: &'static str,
    pub k: usize,
    pub pool: usize,
}

#[derive(Debug, Serialize)]
pub struct CalibrationMeta {
    pub strategy: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<[f64; 2]>,
}

#[derive(Debug, Serialize)]
pub struct ModelsMeta {
    pub llm: String,
    pub embedding: String,
}

#[derive(Debug, Serialize)]
pub struct MatchResultBlock {
    pub rank: usize,
    pub program_id: String,
    pub program_name: String,
    pub source_url: Option<String>,
    pub scores: ScoresBlock,
    pub subscores: SubScores,
    pub reasons: Vec<String>,
    pub improvements: Vec<String>,
    pub violations: Vec<Violation>,
    pub evidence: EvidenceBlock,
}

#[derive(Debug, Serialize)]
pub struct ScoresBlock {
    pub rule: f64,
    pub content: f64,
    pub goal: f64,
    pub final_raw: f64,
    pub final_cal: f64,
    pub raw_distance: f64,
}

#[derive(Debug, Serialize)]
pub struct EvidenceBlock {
    pub project: Vec<String>,
    pub program: Vec<String>,
}

/// Outcome of one orchestrator invocation. `inserted` is the verified
/// stored row count; `error` carries a persistence failure that did not
/// void the payload.
#[derive(Debug)]
pub struct MatchOutcome {
    pub payload: MatchPayload,
    pub inserted: i64,
    pub run_at: String,
    pub error: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Orchestration
// ────────────────────────────────────────────────────────────────────────────

/// Runs one match for `project` and persists the top-K rows.
pub async fn run_match(
    pool: &PgPool,
    store: &VectorStore,
    llm: &LlmClient,
    config: &Config,
    project: &Project,
    top_k: usize,
    calibration: Calibration,
) -> Result<MatchOutcome, MatchError> {
    validate_project(project)?;

    let weights = config.match_weights;
    let pool_k = retrieval_pool_size(top_k, config.match_retrieval_multiplier);

    let pipeline = async {
        let candidates = retrieve_candidates(store, project, pool_k)
            .await
            .map_err(|e| MatchError::Index(e.to_string()))?;
        info!(
            project_id = %project.id,
            retrieved = candidates.len(),
            pool_k,
            "Retrieved candidate pool"
        );
        let total = candidates.len();
        let ranked = rank_candidates(llm, project, candidates, &weights).await;
        Ok::<_, MatchError>((total, ranked))
    };

    let (retrieved, mut ranked) = tokio::time::timeout(
        std::time::Duration::from_secs(RUN_DEADLINE_SECS),
        pipeline,
    )
    .await
    .map_err(|_| MatchError::Deadline)??;

    let run_at_utc = Utc::now();
    let run_at = run_at_utc.to_rfc3339_opts(SecondsFormat::Micros, true);

    let diagnostics = if retrieved == 0 {
        Some("retrieval returned no candidates".to_string())
    } else if ranked.is_empty() {
        warn!(project_id = %project.id, "All candidates failed scoring");
        Some("all candidates failed scoring".to_string())
    } else {
        None
    };

    ranked.truncate(top_k);
    apply_calibration(&mut ranked, calibration);

    let results: Vec<MatchResultBlock> = ranked
        .iter()
        .map(|candidate| pack_result(candidate, project))
        .collect();

    let meta = MatchMeta {
        run_at: run_at.clone(),
        weights,
        retrieval: RetrievalMeta {
            collection: config.collection_name.clone(),
            metric: "cosine",
            k: top_k,
            pool: pool_k,
        },
        calibration: match calibration {
            Calibration::None => None,
            strategy => Some(CalibrationMeta {
                strategy: strategy.as_str(),
                range: strategy.range(),
            }),
        },
        models: ModelsMeta {
            llm: llm.model().to_string(),
            embedding: config.embed_model.clone(),
        },
        diagnostics,
    };

    let rows = result_rows(project, &results, run_at_utc);
    let (inserted, error) = if rows.is_empty() {
        (0, None)
    } else {
        match upsert_match_rows(pool, &config.match_table, &rows).await {
            Ok(count) => (count, None),
            Err(e) => {
                warn!(project_id = %project.id, "Persistence failed: {e}");
                (0, Some(e.to_string()))
            }
        }
    };

    Ok(MatchOutcome {
        payload: MatchPayload {
            project_ref: ProjectRef {
                id: project.id,
                slug: project.slug.clone(),
            },
            project: ProjectSnapshot {
                name: project.name.clone(),
                description: project.description.clone(),
                sectors: project.sectors.clone(),
                stage: project.stage.clone(),
                funding_need: project.funding_need,
                goals: project.goals.clone(),
            },
            meta,
            results,
        },
        inserted,
        run_at,
        error,
    })
}

/// Input validation applied before any LLM call.
fn validate_project(project: &Project) -> Result<(), MatchError> {
    if project.name.trim().is_empty() {
        return Err(MatchError::Input("project name is empty".to_string()));
    }
    if project.description.trim().is_empty() {
        return Err(MatchError::Input("project description is empty".to_string()));
    }
    if project.sectors.is_empty() {
        return Err(MatchError::Input("project sectors are empty".to_string()));
    }
    if project.funding_need < 0.0 || !project.funding_need.is_finite() {
        return Err(MatchError::Input("funding_need must be >= 0".to_string()));
    }
    Ok(())
}

fn pack_result(candidate: &RankedCandidate, project: &Project) -> MatchResultBlock {
    let md = &candidate.doc.metadata;
    let identity = identify_program(md);
    MatchResultBlock {
        rank: candidate.rank,
        program_id: identity.id,
        program_name: identity.name,
        source_url: identity.url,
        scores: ScoresBlock {
            rule: candidate.scores.rule,
            content: candidate.scores.content,
            goal: candidate.scores.goal,
            final_raw: candidate.scores.final_raw,
            final_cal: candidate.scores.final_cal,
            raw_distance: candidate.raw_distance,
        },
        subscores: candidate.subs,
        reasons: candidate.reasons.clone(),
        improvements: candidate.improvements.clone(),
        violations: derive_violations(md, project),
        evidence: EvidenceBlock {
            project: evidence_pair(&project.description, &project.goals),
            program: evidence_pair(
                meta_str(md, &["objectives", "description"]).unwrap_or_default(),
                &meta_str_list(md, "goals"),
            ),
        },
    }
}

/// Up to two short extracts: the narrative field plus the first goals.
fn evidence_pair(narrative: &str, goals: &[String]) -> Vec<String> {
    let mut out = vec![];
    let narrative = narrative.trim();
    if !narrative.is_empty() {
        out.push(narrative.to_string());
    }
    let joined = goals
        .iter()
        .take(MAX_EVIDENCE_GOALS)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if !joined.is_empty() {
        out.push(joined);
    }
    out.truncate(MAX_EVIDENCE);
    out
}

fn result_rows(
    project: &Project,
    results: &[MatchResultBlock],
    run_at: DateTime<Utc>,
) -> Vec<MatchRow> {
    results
        .iter()
        .map(|r| MatchRow {
            project_id: project.id,
            project_slug: project.slug.clone(),
            program_id: r.program_id.clone(),
            program_name: r.program_name.clone(),
            source_url: r.source_url.clone(),
            rank: r.rank as i32,
            score_rule: r.scores.rule,
            score_content: r.scores.content,
            score_goal: r.scores.goal,
            score_final_raw: r.scores.final_raw,
            score_final_cal: r.scores.final_cal,
            raw_distance: Some(r.scores.raw_distance),
            subs_sector: r.subscores.sector,
            subs_stage: r.subscores.stage,
            subs_funding: r.subscores.funding,
            reasons: r.reasons.clone(),
            improvements: r.improvements.clone(),
            evidence_project: r.evidence.project.clone(),
            evidence_program: r.evidence.program.clone(),
            run_at,
        })
        .collect()
}
