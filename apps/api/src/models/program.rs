//! The catalog entity: a structured support-program record, plus the
//! duck-typed metadata helpers used when the record comes back out of the
//! vector index.
//!
//! Metadata attached to index documents is free-text-sourced and varies in
//! presence and naming, so all reads go through the `meta_*` helpers and
//! program identity goes through a single resolver with a documented key
//! priority.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A support program extracted from one source document.
///
/// After fallback enrichment every field is populated: lists may be empty
/// but `id`, `name` and `description` never are, and
/// `funding_min <= funding_max` holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Program {
    pub id: String,
    pub name: String,
    pub description: String,
    pub objectives: String,
    pub goals: Vec<String>,
    pub features: Vec<String>,
    pub eligibility_must: Vec<String>,
    pub sector_tags: Vec<String>,
    pub stage_tags: Vec<String>,
    pub url: Option<String>,
    pub source_path: Option<String>,
    pub last_updated: Option<String>,
    pub launch_date: Option<String>,
    /// One of: grant | loan | equity | in-kind.
    pub funding_type: Option<String>,
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub funding_min: f64,
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub funding_max: f64,
    pub program_type: Option<String>,
    pub objectives_text: Option<String>,
}

impl Program {
    /// Index-document metadata: the full record filtered to
    /// primitive-friendly forms (strings, numbers, bools, arrays of
    /// strings). Nested objects and nulls are dropped.
    pub fn to_metadata(&self) -> Map<String, Value> {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        let mut out = Map::new();
        if let Value::Object(map) = value {
            for (key, val) in map {
                match val {
                    Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                        out.insert(key, val);
                    }
                    Value::Array(items)
                        if items.iter().all(|i| matches!(i, Value::String(_))) =>
                    {
                        out.insert(key, Value::Array(items));
                    }
                    _ => {}
                }
            }
        }
        out
    }
}

/// Extracted numeric bounds arrive as numbers, numeric strings, or null.
fn f64_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Metadata access (duck-typed)
// ────────────────────────────────────────────────────────────────────────────

/// First non-empty string under any of the given keys.
pub fn meta_str<'a>(md: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        md.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    })
}

/// String list under a key. Accepts a JSON array of strings or a
/// comma-joined string (both shapes occur in indexed metadata).
pub fn meta_str_list(md: &Map<String, Value>, key: &str) -> Vec<String> {
    match md.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => vec![],
    }
}

/// Numeric field; tolerates a numeric-as-string.
pub fn meta_f64(md: &Map<String, Value>, key: &str) -> Option<f64> {
    match md.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Program identity
// ────────────────────────────────────────────────────────────────────────────

/// Identity of a program as resolved from index metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramIdentity {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
}

/// Resolves program identity from metadata, trying id keys in priority
/// order: `id -> program_id -> slug -> uuid -> code -> source_path`.
/// Falls back to the display name when no id key is present at all.
pub fn identify_program(md: &Map<String, Value>) -> ProgramIdentity {
    let name = meta_str(md, &["name", "program_name", "title"])
        .unwrap_or("Program")
        .to_string();
    let id = meta_str(md, &["id", "program_id", "slug", "uuid", "code", "source_path"])
        .map(str::to_string)
        .unwrap_or_else(|| name.clone());
    let url = meta_str(md, &["url", "source_url", "source_path"]).and_then(clean_url);
    ProgramIdentity { id, name, url }
}

/// Extracts a bare http(s) link from a possibly markdown-decorated value:
/// `[label](https://x)` resolves to `https://x`, otherwise the last raw
/// link in the string wins, otherwise the value passes through.
pub fn clean_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    lazy_static::lazy_static! {
        static ref PAREN_URL_RE: regex::Regex =
            regex::Regex::new(r"\((https?://[^)]+)\)").unwrap();
        static ref URL_RE: regex::Regex = regex::Regex::new(r"https?://\S+").unwrap();
    }
    if let Some(cap) = PAREN_URL_RE.captures(raw) {
        return Some(cap[1].to_string());
    }
    if let Some(m) = URL_RE.find_iter(raw).last() {
        return Some(m.as_str().to_string());
    }
    Some(raw.to_string())
}
