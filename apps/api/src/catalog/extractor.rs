//! Program Extractor — turns one Markdown source document into a
//! structured `Program` record.
//!
//! Extraction is two-layered. Layer 1 is a structured LLM call (strict
//! JSON, temperature 0, fixed seed). Layer 2 is a deterministic fallback
//! enricher that fills every field the LLM left empty, so a syntactically
//! valid and fully populated record comes out even when the LLM call
//! fails outright. A single bad document never aborts a catalog build.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use crate::catalog::prompts::{extraction_system, EXTRACTION_PROMPT_TEMPLATE};
use crate::llm_client::LlmClient;
use crate::models::program::Program;

lazy_static! {
    static ref HEADING_RE: Regex = Regex::new(r"(?m)^\s{0,3}#{1,6}\s+(.+)$").unwrap();
    static ref URL_RE: Regex = Regex::new(r"https?://\S+").unwrap();
    static ref BULLET_RE: Regex = Regex::new(r"(?m)^\s*[-*•▪+]\s+(.+)$").unwrap();
    static ref FIELD_LINE_RE: Regex = Regex::new(
        r"(?mi)^(?:الأهداف|Goals|Objectives|الميزات|Features|Eligibility|الأهلية)\s*[:：-]\s*(.+)$"
    )
    .unwrap();
    static ref SLUG_STRIP_RE: Regex = Regex::new(r"[^\w\x{0600}-\x{06FF}-]+").unwrap();
    static ref DASH_RUN_RE: Regex = Regex::new(r"-+").unwrap();
}

const MAX_LIST_ITEMS: usize = 8;

/// Extracts one program record from Markdown. Never fails: an LLM error
/// degrades to a skeleton record completed by the fallback enricher.
pub async fn extract_program(markdown: &str, notes: &str, llm: &LlmClient) -> Program {
    let prompt = EXTRACTION_PROMPT_TEMPLATE
        .replace("{markdown}", markdown)
        .replace("{notes}", if notes.is_empty() { "لا يوجد" } else { notes });

    let mut program = match llm.call_json::<Program>(&prompt, &extraction_system()).await {
        Ok(p) => p,
        Err(e) => {
            warn!("Structured extraction failed, using fallback only: {e}");
            Program {
                id: "program".to_string(),
                name: "برنامج".to_string(),
                ..Default::default()
            }
        }
    };

    enrich(&mut program, markdown);
    program
}

/// Fills empty fields deterministically from the Markdown structure and
/// keyword heuristics. Idempotent: enriching an already complete record
/// changes nothing.
pub fn enrich(program: &mut Program, markdown: &str) {
    if program.name.trim().is_empty() {
        program.name = first_heading(markdown).unwrap_or_else(|| "برنامج".to_string());
    }
    if program.description.trim().is_empty() {
        program.description = first_paragraph(markdown);
    }
    if program.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
        program.url = first_url(markdown);
    }

    if program.goals.is_empty() {
        let mut lines = collect_bullets(markdown);
        if lines.is_empty() {
            lines = collect_field_lines(markdown);
        }
        program.goals = dedup_keep_order(lines, MAX_LIST_ITEMS);
    }
    if program.features.is_empty() {
        program.features = dedup_keep_order(collect_field_lines(markdown), MAX_LIST_ITEMS);
    }
    if program.eligibility_must.is_empty() {
        let eligibility = collect_field_lines(markdown)
            .into_iter()
            .filter(|line| {
                line.contains("شروط") || line.contains("الأهلية") || line.contains("Eligible")
            })
            .collect();
        program.eligibility_must = dedup_keep_order(eligibility, MAX_LIST_ITEMS);
    }

    if program.sector_tags.is_empty() {
        program.sector_tags = sector_heuristics(markdown);
    }
    if program.stage_tags.is_empty() {
        program.stage_tags = stage_heuristics(markdown);
    }

    if program.objectives.trim().is_empty() && !program.goals.is_empty() {
        program.objectives = program.goals[..program.goals.len().min(3)].join("؛ ");
    }

    let id = program.id.trim().to_lowercase();
    if id.is_empty() || id == "none" || id == "null" {
        program.id = slug_ar_lat(&program.name);
    }

    if !program.funding_min.is_finite() || program.funding_min < 0.0 {
        program.funding_min = 0.0;
    }
    if !program.funding_max.is_finite() || program.funding_max < 0.0 {
        program.funding_max = 0.0;
    }
    if program.funding_min > program.funding_max {
        std::mem::swap(&mut program.funding_min, &mut program.funding_max);
    }
}

/// Slug from a possibly Arabic name: lowercased, non-word runs collapsed
/// to single dashes, Arabic letters kept.
pub fn slug_ar_lat(name: &str) -> String {
    let s = name.trim().to_lowercase();
    let s = SLUG_STRIP_RE.replace_all(&s, "-");
    let s = DASH_RUN_RE.replace_all(&s, "-");
    let s = s.trim_matches('-').to_string();
    if s.is_empty() {
        "program".to_string()
    } else {
        s
    }
}

fn first_heading(markdown: &str) -> Option<String> {
    HEADING_RE
        .captures(markdown)
        .map(|cap| cap[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First paragraph that is neither a heading nor a bullet.
fn first_paragraph(markdown: &str) -> String {
    for block in markdown.split("\n\n") {
        let block = block.trim();
        if block.is_empty() || block.starts_with('#') {
            continue;
        }
        if BULLET_RE.is_match(block) {
            continue;
        }
        return block.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    String::new()
}

fn first_url(markdown: &str) -> Option<String> {
    URL_RE
        .find(markdown)
        .map(|m| m.as_str().trim_end_matches([')', '.', '،']).to_string())
}

fn collect_bullets(markdown: &str) -> Vec<String> {
    BULLET_RE
        .captures_iter(markdown)
        .map(|cap| cap[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn collect_field_lines(markdown: &str) -> Vec<String> {
    FIELD_LINE_RE
        .captures_iter(markdown)
        .map(|cap| cap[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn dedup_keep_order(items: Vec<String>, cap: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .take(cap)
        .collect()
}

fn sector_heuristics(markdown: &str) -> Vec<String> {
    let text = markdown.to_lowercase();
    let mut tags = vec![];
    if ["health", "الصحة", "تقنية صحية", "digital health"]
        .iter()
        .any(|k| text.contains(k))
    {
        tags.push("الصحة".to_string());
        tags.push("تقنية صحية".to_string());
    }
    if ["commerce", "تجارة", "التجارة الإلكترونية"]
        .iter()
        .any(|k| text.contains(k))
    {
        tags.push("التجارة الإلكترونية".to_string());
    }
    if ["ai", "ذكاء اصطناعي"].iter().any(|k| text.contains(k)) {
        tags.push("ذكاء اصطناعي".to_string());
    }
    tags
}

fn stage_heuristics(markdown: &str) -> Vec<String> {
    lazy_static! {
        static ref MVP_RE: Regex = Regex::new(r"\bMVP\b|نموذج أولي|نموذج تجريبي").unwrap();
        static ref LAUNCH_RE: Regex = Regex::new(r"إطلاق|تدشين|launch").unwrap();
        static ref OPERATE_RE: Regex = Regex::new(r"تشغيل|تشغيلي|production|go[- ]?live").unwrap();
        static ref EARLY_GROWTH_RE: Regex = Regex::new(r"نمو مبكر|early growth").unwrap();
    }
    let mut tags = vec![];
    if MVP_RE.is_match(markdown) {
        tags.push("MVP".to_string());
    }
    if LAUNCH_RE.is_match(markdown) {
        tags.push("إطلاق".to_string());
    }
    if OPERATE_RE.is_match(markdown) {
        tags.push("تشغيل".to_string());
    }
    if EARLY_GROWTH_RE.is_match(markdown) {
        tags.push("نمو مبكر".to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MD: &str = r#"# برنامج تمكين الصحة الرقمية

برنامج يدعم الشركات الناشئة في مجال التقنية الصحية عبر منح ودعم تشغيلي.

- تسريع نمو الشركات الصحية
- بناء شراكات مع المستشفيات
- تسريع نمو الشركات الصحية

الأهلية: شروط التسجيل التجاري سارية

التقديم عبر https://example.sa/apply.
"#;

    #[test]
    fn test_enrich_fills_all_core_fields_from_markdown() {
        let mut program = Program::default();
        enrich(&mut program, SAMPLE_MD);

        assert_eq!(program.name, "برنامج تمكين الصحة الرقمية");
        assert!(program.description.contains("برنامج يدعم"));
        assert_eq!(program.url.as_deref(), Some("https://example.sa/apply"));
        assert!(!program.id.is_empty());
    }

    #[test]
    fn test_enrich_goals_from_bullets_deduped() {
        let mut program = Program::default();
        enrich(&mut program, SAMPLE_MD);

        assert_eq!(program.goals.len(), 2);
        assert_eq!(program.goals[0], "تسريع نمو الشركات الصحية");
    }

    #[test]
    fn test_enrich_eligibility_from_field_lines() {
        let mut program = Program::default();
        enrich(&mut program, SAMPLE_MD);

        assert_eq!(program.eligibility_must.len(), 1);
        assert!(program.eligibility_must[0].contains("شروط"));
    }

    #[test]
    fn test_enrich_sector_and_stage_heuristics() {
        let mut program = Program::default();
        enrich(&mut program, "نموذج أولي لمنصة تقنية صحية قبل الإطلاق");

        assert!(program.sector_tags.contains(&"الصحة".to_string()));
        assert!(program.stage_tags.contains(&"MVP".to_string()));
        assert!(program.stage_tags.contains(&"إطلاق".to_string()));
    }

    #[test]
    fn test_enrich_objectives_summarizes_first_three_goals() {
        let mut program = Program {
            goals: vec!["أ".into(), "ب".into(), "ج".into(), "د".into()],
            ..Default::default()
        };
        enrich(&mut program, "");
        assert_eq!(program.objectives, "أ؛ ب؛ ج");
    }

    #[test]
    fn test_enrich_does_not_overwrite_existing_fields() {
        let mut program = Program {
            name: "اسم موجود".into(),
            description: "وصف موجود".into(),
            ..Default::default()
        };
        enrich(&mut program, SAMPLE_MD);
        assert_eq!(program.name, "اسم موجود");
        assert_eq!(program.description, "وصف موجود");
    }

    #[test]
    fn test_enrich_swaps_inverted_funding_bounds() {
        let mut program = Program {
            funding_min: 500000.0,
            funding_max: 100000.0,
            ..Default::default()
        };
        enrich(&mut program, "");
        assert!(program.funding_min <= program.funding_max);
        assert_eq!(program.funding_min, 100000.0);
    }

    #[test]
    fn test_enrich_empty_document_still_yields_valid_record() {
        let mut program = Program::default();
        enrich(&mut program, "");
        assert_eq!(program.name, "برنامج");
        assert_eq!(program.id, "برنامج");
        assert_eq!(program.funding_min, 0.0);
        assert_eq!(program.funding_max, 0.0);
    }

    #[test]
    fn test_slug_keeps_arabic_and_collapses_separators() {
        assert_eq!(slug_ar_lat("برنامج  تمكين!"), "برنامج-تمكين");
        assert_eq!(slug_ar_lat("Health Boost 2025"), "health-boost-2025");
        assert_eq!(slug_ar_lat("  "), "program");
    }

    #[test]
    fn test_id_placeholder_values_are_replaced() {
        for bad in ["", "none", "NULL"] {
            let mut program = Program {
                id: bad.into(),
                name: "برنامج نمو".into(),
                ..Default::default()
            };
            enrich(&mut program, "");
            assert_eq!(program.id, "برنامج-نمو");
        }
    }
}
