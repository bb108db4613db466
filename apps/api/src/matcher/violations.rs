//! Violation Deriver — structured mismatch explanations computed purely
//! from program metadata and project attributes. No LLM involvement, no
//! filtering: a violation decorates a result, it never suppresses one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::program::{meta_f64, meta_str, meta_str_list};
use crate::models::project::Project;
use crate::models::stages::stage_index;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    #[serde(rename = "type")]
    pub kind: String,
    pub why: String,
    pub evidence: String,
}

const HEALTH_MARKERS: [&str; 5] = ["الصحة", "صحية", "صحي", "health", "تقنية صحية"];

/// Derives every applicable violation for one candidate.
pub fn derive_violations(md: &Map<String, Value>, project: &Project) -> Vec<Violation> {
    let mut violations = vec![];

    if let Some(v) = sector_mismatch(md, project) {
        violations.push(v);
    }
    if let Some(v) = stage_too_early(md, project) {
        violations.push(v);
    }
    if let Some(v) = funding_gap(md, project) {
        violations.push(v);
    }
    if let Some(v) = in_kind_vs_cash(md, project) {
        violations.push(v);
    }
    if let Some(v) = eligibility_missing(md, project) {
        violations.push(v);
    }

    violations
}

/// Both sides declare sectors and they do not intersect.
fn sector_mismatch(md: &Map<String, Value>, project: &Project) -> Option<Violation> {
    let program_sectors = meta_str_list(md, "sector_tags");
    if program_sectors.is_empty() || project.sectors.is_empty() {
        return None;
    }
    let overlaps = program_sectors.iter().any(|ps| {
        project
            .sectors
            .iter()
            .any(|js| sectors_overlap(ps, js))
    });
    if overlaps {
        return None;
    }
    Some(Violation {
        kind: "sector_mismatch".to_string(),
        why: "قطاعات البرنامج لا تتقاطع مع قطاعات المشروع".to_string(),
        evidence: format!(
            "program={}; project={}",
            program_sectors.join(", "),
            project.sectors.join(", ")
        ),
    })
}

/// Loose sector comparison: case-insensitive equality or containment
/// either way, so "الصحة" matches "تقنية صحية" style taggings.
fn sectors_overlap(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    a == b || a.contains(&b) || b.contains(&a)
}

/// The project sits below the earliest stage the program targets.
fn stage_too_early(md: &Map<String, Value>, project: &Project) -> Option<Violation> {
    let project_idx = stage_index(&project.stage)?;
    let min_required = meta_str_list(md, "stage_tags")
        .iter()
        .filter_map(|tag| stage_index(tag))
        .min()?;
    if project_idx >= min_required {
        return None;
    }
    let gap = min_required - project_idx;
    Some(Violation {
        kind: "stage_too_early".to_string(),
        why: format!("مرحلة المشروع أبكر من أدنى مرحلة يستهدفها البرنامج (فجوة {gap})"),
        evidence: format!("min_required={min_required}, project={project_idx}"),
    })
}

/// The funding need exceeds the program ceiling (when the ceiling is known).
fn funding_gap(md: &Map<String, Value>, project: &Project) -> Option<Violation> {
    let funding_max = meta_f64(md, "funding_max").filter(|max| *max > 0.0)?;
    if project.funding_need <= funding_max {
        return None;
    }
    Some(Violation {
        kind: "funding_gap".to_string(),
        why: format!(
            "التمويل المطلوب {} يتجاوز سقف البرنامج {}",
            project.funding_need, funding_max
        ),
        evidence: format!("need={}, max={}", project.funding_need, funding_max),
    })
}

/// The program offers in-kind support while the project needs cash.
fn in_kind_vs_cash(md: &Map<String, Value>, project: &Project) -> Option<Violation> {
    let funding_type = meta_str(md, &["funding_type"])?;
    if funding_type != "in-kind" || project.funding_need <= 0.0 {
        return None;
    }
    Some(Violation {
        kind: "in_kind_vs_cash".to_string(),
        why: "البرنامج يقدم دعمًا عينيًا بينما يحتاج المشروع تمويلًا نقديًا".to_string(),
        evidence: format!("funding_type=in-kind, need={}", project.funding_need),
    })
}

/// Keyword heuristic over eligibility lines: a health-restricted condition
/// flagged for a non-health project.
fn eligibility_missing(md: &Map<String, Value>, project: &Project) -> Option<Violation> {
    let project_is_health = project
        .sectors
        .iter()
        .any(|s| HEALTH_MARKERS.iter().any(|m| s.to_lowercase().contains(m)));
    if project_is_health {
        return None;
    }
    let line = meta_str_list(md, "eligibility_must").into_iter().find(|line| {
        let lower = line.to_lowercase();
        HEALTH_MARKERS.iter().any(|m| lower.contains(m))
    })?;
    Some(Violation {
        kind: "eligibility_missing".to_string(),
        why: "شرط أهلية قد لا ينطبق على المشروع".to_string(),
        evidence: line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn project(stage: &str, sectors: &[&str], funding_need: f64) -> Project {
        Project {
            id: Uuid::nil(),
            slug: None,
            name: "X".to_string(),
            description: "desc".to_string(),
            stage: stage.to_string(),
            sectors: sectors.iter().map(|s| s.to_string()).collect(),
            goals: vec!["scale".to_string()],
            funding_need,
        }
    }

    fn md(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_sector_mismatch_on_disjoint_sets() {
        let m = md(json!({"sector_tags": ["التجارة الإلكترونية"]}));
        let v = derive_violations(&m, &project("MVP", &["fintech"], 0.0));
        assert!(v.iter().any(|v| v.kind == "sector_mismatch"));
    }

    #[test]
    fn test_sector_overlap_suppresses_mismatch() {
        let m = md(json!({"sector_tags": ["تقنية صحية"]}));
        let v = derive_violations(&m, &project("MVP", &["صحية"], 0.0));
        assert!(!v.iter().any(|v| v.kind == "sector_mismatch"));
    }

    #[test]
    fn test_sector_mismatch_needs_both_sides_nonempty() {
        let m = md(json!({"sector_tags": []}));
        let v = derive_violations(&m, &project("MVP", &["fintech"], 0.0));
        assert!(!v.iter().any(|v| v.kind == "sector_mismatch"));

        let m = md(json!({"sector_tags": ["الصحة"]}));
        let v = derive_violations(&m, &project("MVP", &[], 0.0));
        assert!(!v.iter().any(|v| v.kind == "sector_mismatch"));
    }

    #[test]
    fn test_stage_too_early_reports_indices() {
        // Project at "فكرة" (0) vs program targeting "نمو" (5).
        let m = md(json!({"stage_tags": ["نمو"]}));
        let v = derive_violations(&m, &project("فكرة", &[], 0.0));
        let stage = v.iter().find(|v| v.kind == "stage_too_early").unwrap();
        assert_eq!(stage.evidence, "min_required=5, project=0");
        assert!(stage.why.contains("فجوة 5"));
    }

    #[test]
    fn test_stage_at_or_after_minimum_is_fine() {
        let m = md(json!({"stage_tags": ["MVP", "إطلاق"]}));
        let v = derive_violations(&m, &project("تشغيل", &[], 0.0));
        assert!(!v.iter().any(|v| v.kind == "stage_too_early"));
    }

    #[test]
    fn test_unknown_stages_never_flag() {
        let m = md(json!({"stage_tags": ["مرحلة غريبة"]}));
        let v = derive_violations(&m, &project("فكرة", &[], 0.0));
        assert!(!v.iter().any(|v| v.kind == "stage_too_early"));

        let m = md(json!({"stage_tags": ["نمو"]}));
        let v = derive_violations(&m, &project("غير معروف", &[], 0.0));
        assert!(!v.iter().any(|v| v.kind == "stage_too_early"));
    }

    #[test]
    fn test_funding_gap_when_need_exceeds_ceiling() {
        let m = md(json!({"funding_max": 100000.0}));
        let v = derive_violations(&m, &project("MVP", &[], 500000.0));
        let gap = v.iter().find(|v| v.kind == "funding_gap").unwrap();
        assert!(gap.why.contains("يتجاوز سقف البرنامج"));
        assert_eq!(gap.evidence, "need=500000, max=100000");
    }

    #[test]
    fn test_funding_gap_ignores_unknown_or_zero_ceiling() {
        let m = md(json!({"funding_max": 0.0}));
        let v = derive_violations(&m, &project("MVP", &[], 500000.0));
        assert!(!v.iter().any(|v| v.kind == "funding_gap"));

        let m = md(json!({}));
        let v = derive_violations(&m, &project("MVP", &[], 500000.0));
        assert!(!v.iter().any(|v| v.kind == "funding_gap"));
    }

    #[test]
    fn test_in_kind_vs_cash_needs_positive_need() {
        let m = md(json!({"funding_type": "in-kind"}));
        let v = derive_violations(&m, &project("MVP", &[], 100000.0));
        assert!(v.iter().any(|v| v.kind == "in_kind_vs_cash"));

        let v = derive_violations(&m, &project("MVP", &[], 0.0));
        assert!(!v.iter().any(|v| v.kind == "in_kind_vs_cash"));
    }

    #[test]
    fn test_grant_type_never_flags_in_kind() {
        let m = md(json!({"funding_type": "grant"}));
        let v = derive_violations(&m, &project("MVP", &[], 100000.0));
        assert!(!v.iter().any(|v| v.kind == "in_kind_vs_cash"));
    }

    #[test]
    fn test_eligibility_health_restriction_for_non_health_project() {
        let m = md(json!({"eligibility_must": ["ترخيص من وزارة الصحة"]}));
        let v = derive_violations(&m, &project("MVP", &["fintech"], 0.0));
        let e = v.iter().find(|v| v.kind == "eligibility_missing").unwrap();
        assert_eq!(e.evidence, "ترخيص من وزارة الصحة");
    }

    #[test]
    fn test_eligibility_not_flagged_for_health_project() {
        let m = md(json!({"eligibility_must": ["ترخيص من وزارة الصحة"]}));
        let v = derive_violations(&m, &project("MVP", &["الصحة"], 0.0));
        assert!(!v.iter().any(|v| v.kind == "eligibility_missing"));
    }

    #[test]
    fn test_comma_joined_metadata_lists_are_understood() {
        let m = md(json!({"stage_tags": "نمو, توسع", "sector_tags": "الصحة"}));
        let v = derive_violations(&m, &project("فكرة", &["fintech"], 0.0));
        assert!(v.iter().any(|v| v.kind == "stage_too_early"));
        assert!(v.iter().any(|v| v.kind == "sector_mismatch"));
    }

    #[test]
    fn test_violations_are_deterministic() {
        let m = md(json!({
            "sector_tags": ["الصحة"],
            "stage_tags": ["نمو"],
            "funding_max": 100000.0,
            "funding_type": "in-kind"
        }));
        let p = project("فكرة", &["fintech"], 500000.0);
        assert_eq!(derive_violations(&m, &p), derive_violations(&m, &p));
        assert_eq!(derive_violations(&m, &p).len(), 4);
    }
}
