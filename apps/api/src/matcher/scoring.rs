//! Granular Scorer — LLM-as-judge sub-scores per candidate, fused with
//! the embedding distance into the ranking score.
//!
//! The LLM reply contract is strict (six keys, JSON only) but the parser
//! is deliberately tolerant: replies arrive with leading prose, camelCase
//! aliases, numerics-as-strings, Arabic-Indic digits, or reasons packed
//! into one newline-separated string. A normalization layer folds all of
//! that into a fully populated `GranularReply`; nothing downstream ever
//! sees a raw reply.

use std::cmp::Ordering;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::llm_client::LlmClient;
use crate::matcher::error::ScoringError;
use crate::matcher::prompts::{scoring_system, SCORING_PROMPT_TEMPLATE};
use crate::models::program::{identify_program, meta_f64, meta_str, meta_str_list};
use crate::models::project::Project;
use crate::vector_store::Document;

/// Cap on simultaneous outbound scoring calls within one run.
pub const MAX_CONCURRENT_SCORING: usize = 8;

/// Per-candidate time limit, covering the LLM call including its retries.
const SCORE_TIMEOUT_SECS: u64 = 90;

/// Raw-content excerpt appended to the condensed program text.
const PROGRAM_EXCERPT_CHARS: usize = 1200;

// Fixed rule-score blend (sector, stage, funding).
const RULE_SECTOR_W: f64 = 0.4;
const RULE_STAGE_W: f64 = 0.4;
const RULE_FUNDING_W: f64 = 0.2;

// ────────────────────────────────────────────────────────────────────────────
// Weights
// ────────────────────────────────────────────────────────────────────────────

/// Fusion weights for `final_raw = rule·w + content·w + goal·w`.
/// Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Weights {
    pub rule: f64,
    pub content: f64,
    pub goal: f64,
}

impl Weights {
    /// Balanced calibration — the shipped default.
    pub const BALANCED: Weights = Weights {
        rule: 0.45,
        content: 0.35,
        goal: 0.20,
    };

    /// Content-heavy calibration for catalogs with rich narrative text.
    pub const CONTENT_HEAVY: Weights = Weights {
        rule: 0.30,
        content: 0.50,
        goal: 0.20,
    };

    /// Parses `"rule,content,goal"`; each component in [0, 1], summing to 1.
    pub fn parse(raw: &str) -> Result<Weights, String> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("expected three comma-separated numbers: {e}"))?;
        if parts.len() != 3 {
            return Err(format!("expected 3 weights, got {}", parts.len()));
        }
        let weights = Weights {
            rule: parts[0],
            content: parts[1],
            goal: parts[2],
        };
        if parts.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err("each weight must be in [0, 1]".to_string());
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("weights must sum to 1.0, got {sum}"));
        }
        Ok(weights)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scored candidate
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubScores {
    pub sector: f64,
    pub stage: f64,
    pub funding: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Scores {
    pub rule: f64,
    pub content: f64,
    pub goal: f64,
    pub final_raw: f64,
    pub final_cal: f64,
}

/// A fully scored candidate. `order` is the retrieval insertion position,
/// kept as the deterministic tie-breaker; `rank` is assigned after the
/// sort on `final_raw`.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub doc: Document,
    pub raw_distance: f64,
    pub order: usize,
    pub rank: usize,
    pub subs: SubScores,
    pub scores: Scores,
    pub reasons: Vec<String>,
    pub improvements: Vec<String>,
}

/// Normalized six-key scoring reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GranularReply {
    pub sector_match: f64,
    pub stage_match: f64,
    pub funding_match: f64,
    pub goal_alignment: f64,
    pub reasons: Vec<String>,
    pub improvements: Vec<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Score composition
// ────────────────────────────────────────────────────────────────────────────

/// `rule = 0.4·sector + 0.4·stage + 0.2·funding`.
pub fn rule_score(subs: &SubScores) -> f64 {
    RULE_SECTOR_W * subs.sector + RULE_STAGE_W * subs.stage + RULE_FUNDING_W * subs.funding
}

/// `content = clamp(1 − distance, 0, 1)`.
pub fn content_score(distance: f64) -> f64 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Weighted fusion of the three components.
pub fn final_raw_score(rule: f64, content: f64, goal: f64, weights: &Weights) -> f64 {
    weights.rule * rule + weights.content * content + weights.goal * goal
}

// ────────────────────────────────────────────────────────────────────────────
// Ranking
// ────────────────────────────────────────────────────────────────────────────

/// Scores every candidate with bounded concurrency, drops per-candidate
/// failures with a structured warning, and returns the survivors sorted
/// by `final_raw` descending (ties broken by retrieval order) with
/// 1-based ranks assigned.
pub async fn rank_candidates(
    llm: &LlmClient,
    project: &Project,
    candidates: Vec<(Document, f64)>,
    weights: &Weights,
) -> Vec<RankedCandidate> {
    let weights = *weights;
    let scored: Vec<Option<RankedCandidate>> = stream::iter(candidates.into_iter().enumerate())
        .map(|(order, (doc, distance))| {
            let llm = llm.clone();
            let project = project.clone();
            async move {
                let program_id = identify_program(&doc.metadata).id;
                let attempt = tokio::time::timeout(
                    std::time::Duration::from_secs(SCORE_TIMEOUT_SECS),
                    score_candidate(&llm, &project, &doc, distance, &weights),
                )
                .await
                .unwrap_or(Err(ScoringError::Timeout));
                match attempt {
                    Ok(mut candidate) => {
                        candidate.order = order;
                        Some(candidate)
                    }
                    Err(e) => {
                        warn!(
                            project_id = %project.id,
                            program_id = %program_id,
                            "Dropping candidate from run: {e}"
                        );
                        None
                    }
                }
            }
        })
        .buffer_unordered(MAX_CONCURRENT_SCORING)
        .collect()
        .await;

    let mut ranked: Vec<RankedCandidate> = scored.into_iter().flatten().collect();
    ranked.sort_by(|a, b| {
        b.scores
            .final_raw
            .partial_cmp(&a.scores.final_raw)
            .unwrap_or(Ordering::Equal)
            .then(a.order.cmp(&b.order))
    });
    for (i, candidate) in ranked.iter_mut().enumerate() {
        candidate.rank = i + 1;
    }
    ranked
}

/// One LLM-judged scoring call plus fusion for a single candidate.
async fn score_candidate(
    llm: &LlmClient,
    project: &Project,
    doc: &Document,
    distance: f64,
    weights: &Weights,
) -> Result<RankedCandidate, ScoringError> {
    let prompt = SCORING_PROMPT_TEMPLATE
        .replace("{project_name}", &project.name)
        .replace("{project_description}", &project.description)
        .replace("{project_sectors}", &project.sectors.join(", "))
        .replace("{project_stage}", &project.stage)
        .replace("{project_funding_need}", &project.funding_need.to_string())
        .replace("{project_goals}", &project.goals.join(", "))
        .replace("{program_text}", &condense_program(doc));

    let reply_text = llm.call(&prompt, &scoring_system()).await?;
    let reply = parse_granular_reply(&reply_text)?;

    let subs = SubScores {
        sector: reply.sector_match,
        stage: reply.stage_match,
        funding: reply.funding_match,
    };
    let rule = rule_score(&subs);
    let content = content_score(distance);
    let goal = reply.goal_alignment;
    let final_raw = final_raw_score(rule, content, goal, weights);

    Ok(RankedCandidate {
        doc: doc.clone(),
        raw_distance: distance,
        order: 0,
        rank: 0,
        subs,
        scores: Scores {
            rule,
            content,
            goal,
            final_raw,
            final_cal: final_raw,
        },
        reasons: reply.reasons,
        improvements: reply.improvements,
    })
}

/// Condensed program text for the judge: the structured metadata fields
/// plus a bounded excerpt of the raw indexed content.
pub fn condense_program(doc: &Document) -> String {
    let md = &doc.metadata;
    let mut lines = vec![];
    if let Some(name) = meta_str(md, &["name", "program_name", "title"]) {
        lines.push(format!("name: {name}"));
    }
    let sectors = meta_str_list(md, "sector_tags");
    if !sectors.is_empty() {
        lines.push(format!("sectors: {}", sectors.join(", ")));
    }
    let stages = meta_str_list(md, "stage_tags");
    if !stages.is_empty() {
        lines.push(format!("stages: {}", stages.join(", ")));
    }
    if let Some(funding_type) = meta_str(md, &["funding_type"]) {
        lines.push(format!("funding_type: {funding_type}"));
    }
    if let (Some(min), Some(max)) = (meta_f64(md, "funding_min"), meta_f64(md, "funding_max")) {
        if max > 0.0 {
            lines.push(format!("funding_range: {min} - {max}"));
        }
    }
    let goals = meta_str_list(md, "goals");
    if !goals.is_empty() {
        lines.push(format!("goals: {}", goals.join("; ")));
    }
    let eligibility = meta_str_list(md, "eligibility_must");
    if !eligibility.is_empty() {
        lines.push(format!("eligibility: {}", eligibility.join("; ")));
    }
    let excerpt: String = doc.page_content.chars().take(PROGRAM_EXCERPT_CHARS).collect();
    if !excerpt.trim().is_empty() {
        lines.push(format!("content: {}", excerpt.trim()));
    }
    lines.join("\n")
}

// ────────────────────────────────────────────────────────────────────────────
// Reply normalization
// ────────────────────────────────────────────────────────────────────────────

/// Parses a scoring reply into a fully populated `GranularReply`.
/// Tolerates prose around the JSON object, alias keys, string numerics,
/// and Arabic-Indic digits. All numerics are clamped to [0, 1]; sector,
/// stage and funding are rounded to the nearest 0.1.
pub fn parse_granular_reply(text: &str) -> Result<GranularReply, ScoringError> {
    let object_text = extract_first_json_object(text).ok_or(ScoringError::NoJson)?;
    let object_text = fold_arabic_digits(object_text);
    let value: Value = serde_json::from_str(&object_text)?;
    let map = match value {
        Value::Object(map) => map,
        _ => return Err(ScoringError::NoJson),
    };

    let sector = unit_field(&map, &["sector_match", "sectorMatch"]);
    let stage = unit_field(&map, &["stage_match", "stageMatch"]);
    let funding = unit_field(&map, &["funding_match", "fundingMatch"]);
    let goal = unit_field(&map, &["goal_alignment", "goalAlignment"]);

    Ok(GranularReply {
        sector_match: round_tenth(sector),
        stage_match: round_tenth(stage),
        funding_match: round_tenth(funding),
        goal_alignment: goal,
        reasons: list_field(&map, &["reasons", "reason"]),
        improvements: list_field(&map, &["improvements", "improvement", "suggestions"]),
    })
}

/// First balanced `{...}` in the text, string- and escape-aware.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, byte) in text.bytes().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Folds Arabic-Indic and Extended Arabic-Indic digits (and the Arabic
/// decimal separator) into their ASCII forms.
pub fn fold_arabic_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => (b'0' + (c as u32 - 0x0660) as u8) as char,
            '\u{06F0}'..='\u{06F9}' => (b'0' + (c as u32 - 0x06F0) as u8) as char,
            '\u{066B}' => '.', // Arabic decimal separator
            other => other,
        })
        .collect()
}

fn aliased<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| map.get(*name))
}

/// Numeric field under any alias, coerced and clamped to [0, 1].
/// Missing or uncoercible values score 0.
fn unit_field(map: &Map<String, Value>, names: &[&str]) -> f64 {
    aliased(map, names).and_then(coerce_unit).unwrap_or(0.0)
}

fn coerce_unit(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => fold_arabic_digits(s).trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(n.clamp(0.0, 1.0))
}

fn round_tenth(value: f64) -> f64 {
    (value.clamp(0.0, 1.0) * 10.0).round() / 10.0
}

/// Coerces a reply field into a list of non-empty strings. A plain string
/// is split on newlines with leading bullet markers stripped; objects are
/// unwrapped through common text keys.
fn list_field(map: &Map<String, Value>, names: &[&str]) -> Vec<String> {
    let value = match aliased(map, names) {
        Some(v) => v,
        None => return vec![],
    };
    match value {
        Value::String(s) => split_bulleted(s),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => non_blank(s),
                Value::Object(obj) => ["text", "reason", "improvement", "item", "note", "point"]
                    .iter()
                    .find_map(|key| obj.get(*key).and_then(Value::as_str).and_then(non_blank)),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}

fn split_bulleted(s: &str) -> Vec<String> {
    s.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•', '▪'])
                .trim_start()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EPS: f64 = 1e-6;

    #[test]
    fn test_rule_score_blend() {
        let subs = SubScores {
            sector: 0.8,
            stage: 0.6,
            funding: 0.5,
        };
        assert!((rule_score(&subs) - (0.4 * 0.8 + 0.4 * 0.6 + 0.2 * 0.5)).abs() < EPS);
    }

    #[test]
    fn test_content_score_clamps_distance() {
        assert!((content_score(0.25) - 0.75).abs() < EPS);
        assert_eq!(content_score(1.5), 0.0);
        assert_eq!(content_score(-0.5), 1.0);
    }

    #[test]
    fn test_final_raw_is_weighted_sum() {
        let w = Weights::BALANCED;
        let v = final_raw_score(0.6, 0.7, 0.5, &w);
        assert!((v - (0.45 * 0.6 + 0.35 * 0.7 + 0.20 * 0.5)).abs() < EPS);
    }

    #[test]
    fn test_weight_tuples_sum_to_one() {
        for w in [Weights::BALANCED, Weights::CONTENT_HEAVY] {
            assert!((w.rule + w.content + w.goal - 1.0).abs() < EPS);
        }
    }

    #[test]
    fn test_weights_parse_valid() {
        let w = Weights::parse("0.30, 0.50, 0.20").unwrap();
        assert!((w.rule - 0.30).abs() < EPS);
        assert!((w.content - 0.50).abs() < EPS);
        assert!((w.goal - 0.20).abs() < EPS);
    }

    #[test]
    fn test_weights_parse_rejects_bad_sum_and_arity() {
        assert!(Weights::parse("0.5,0.5,0.5").is_err());
        assert!(Weights::parse("0.5,0.5").is_err());
        assert!(Weights::parse("a,b,c").is_err());
    }

    #[test]
    fn test_extract_json_object_with_surrounding_prose() {
        let text = "Sure, here is the evaluation: {\"sector_match\": 0.8} hope this helps";
        assert_eq!(
            extract_first_json_object(text),
            Some("{\"sector_match\": 0.8}")
        );
    }

    #[test]
    fn test_extract_json_object_ignores_braces_in_strings() {
        let text = r#"noise {"reasons": ["uses { and } freely"], "stage_match": 1} tail"#;
        let object = extract_first_json_object(text).unwrap();
        assert!(object.ends_with("1}"));
        assert!(serde_json::from_str::<Value>(object).is_ok());
    }

    #[test]
    fn test_extract_json_object_none_without_object() {
        assert_eq!(extract_first_json_object("no json here"), None);
    }

    #[test]
    fn test_fold_arabic_digits() {
        assert_eq!(fold_arabic_digits("٠٫٨"), "0.8");
        assert_eq!(fold_arabic_digits("۰۹"), "09");
        assert_eq!(fold_arabic_digits("0.5"), "0.5");
    }

    #[test]
    fn test_parse_reply_happy_path() {
        let reply = parse_granular_reply(
            r#"{"sector_match": 0.8, "stage_match": 0.6, "funding_match": 0.4,
                "goal_alignment": 0.75,
                "reasons": ["سبب أول", "سبب ثانٍ"],
                "improvements": ["تحسين"]}"#,
        )
        .unwrap();
        assert_eq!(reply.sector_match, 0.8);
        assert_eq!(reply.goal_alignment, 0.75);
        assert_eq!(reply.reasons.len(), 2);
        assert_eq!(reply.improvements, vec!["تحسين"]);
    }

    #[test]
    fn test_parse_reply_with_prefix_and_suffix_prose() {
        // Scenario: "prefix {…valid JSON…} suffix" must still parse.
        let reply = parse_granular_reply(
            "Here is my evaluation:\n{\"sector_match\": 1.0, \"stage_match\": 0.5, \
             \"funding_match\": 0.0, \"goal_alignment\": 0.9, \"reasons\": [], \
             \"improvements\": []}\nLet me know if you need more.",
        )
        .unwrap();
        assert_eq!(reply.sector_match, 1.0);
        assert_eq!(reply.goal_alignment, 0.9);
    }

    #[test]
    fn test_parse_reply_camel_case_aliases() {
        let reply = parse_granular_reply(
            r#"{"sectorMatch": 0.7, "stageMatch": 0.3, "fundingMatch": 0.2,
                "goalAlignment": 0.5, "reasons": [], "improvements": []}"#,
        )
        .unwrap();
        assert_eq!(reply.sector_match, 0.7);
        assert_eq!(reply.stage_match, 0.3);
        assert_eq!(reply.funding_match, 0.2);
        assert_eq!(reply.goal_alignment, 0.5);
    }

    #[test]
    fn test_parse_reply_numeric_strings_and_arabic_digits() {
        let reply = parse_granular_reply(
            r#"{"sector_match": "٠٫٨", "stage_match": "0.6", "funding_match": 0.4,
                "goal_alignment": "0.55", "reasons": [], "improvements": []}"#,
        )
        .unwrap();
        assert_eq!(reply.sector_match, 0.8);
        assert_eq!(reply.stage_match, 0.6);
        assert!((reply.goal_alignment - 0.55).abs() < EPS);
    }

    #[test]
    fn test_parse_reply_clamps_and_rounds_subscores() {
        let reply = parse_granular_reply(
            r#"{"sector_match": 1.7, "stage_match": -0.2, "funding_match": 0.44,
                "goal_alignment": 2.0, "reasons": [], "improvements": []}"#,
        )
        .unwrap();
        assert_eq!(reply.sector_match, 1.0);
        assert_eq!(reply.stage_match, 0.0);
        assert_eq!(reply.funding_match, 0.4);
        assert_eq!(reply.goal_alignment, 1.0);
        // Sub-scores land on the 0.1 grid
        for v in [reply.sector_match, reply.stage_match, reply.funding_match] {
            assert!((v * 10.0 - (v * 10.0).round()).abs() < EPS);
        }
    }

    #[test]
    fn test_parse_reply_missing_keys_default_to_zero() {
        let reply = parse_granular_reply(r#"{"sector_match": 0.9}"#).unwrap();
        assert_eq!(reply.stage_match, 0.0);
        assert_eq!(reply.funding_match, 0.0);
        assert_eq!(reply.goal_alignment, 0.0);
        assert!(reply.reasons.is_empty());
    }

    #[test]
    fn test_parse_reply_reasons_from_bulleted_string() {
        let reply = parse_granular_reply(
            "{\"sector_match\": 0.5, \"stage_match\": 0.5, \"funding_match\": 0.5, \
             \"goal_alignment\": 0.5, \"reasons\": \"- أول\\n- ثانٍ\\n\\n* ثالث\", \
             \"improvements\": []}",
        )
        .unwrap();
        assert_eq!(reply.reasons, vec!["أول", "ثانٍ", "ثالث"]);
    }

    #[test]
    fn test_parse_reply_reasons_from_object_list() {
        let reply = parse_granular_reply(
            r#"{"sector_match": 0.5, "stage_match": 0.5, "funding_match": 0.5,
                "goal_alignment": 0.5,
                "reasons": [{"text": "مطابقة القطاع"}, {"reason": "مرحلة مناسبة"}, {"x": 1}],
                "improvements": [""]}"#,
        )
        .unwrap();
        assert_eq!(reply.reasons, vec!["مطابقة القطاع", "مرحلة مناسبة"]);
        assert!(reply.improvements.is_empty());
    }

    #[test]
    fn test_parse_reply_rejects_reply_without_json() {
        assert!(matches!(
            parse_granular_reply("عذرًا، لا أستطيع التقييم."),
            Err(ScoringError::NoJson)
        ));
    }

    #[test]
    fn test_condense_program_includes_metadata_and_excerpt() {
        let mut metadata = Map::new();
        metadata.insert("name".into(), json!("برنامج أ"));
        metadata.insert("sector_tags".into(), json!(["الصحة"]));
        metadata.insert("stage_tags".into(), json!("MVP, إطلاق"));
        metadata.insert("funding_type".into(), json!("grant"));
        metadata.insert("funding_min".into(), json!(0.0));
        metadata.insert("funding_max".into(), json!(500000.0));
        let doc = Document {
            page_content: "نص البرنامج الكامل".to_string(),
            metadata,
        };
        let text = condense_program(&doc);
        assert!(text.contains("name: برنامج أ"));
        assert!(text.contains("sectors: الصحة"));
        assert!(text.contains("stages: MVP, إطلاق"));
        assert!(text.contains("funding_range: 0 - 500000"));
        assert!(text.contains("content: نص البرنامج الكامل"));
    }

    #[test]
    fn test_condense_program_bounds_excerpt() {
        let doc = Document {
            page_content: "م".repeat(5000),
            metadata: Map::new(),
        };
        let text = condense_program(&doc);
        // "content: " prefix plus the capped excerpt
        assert!(text.chars().count() <= PROGRAM_EXCERPT_CHARS + 20);
    }
}
