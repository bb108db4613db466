//! Project records: the matcher input shape, the creation payload, and the
//! coercions applied when a project row comes back out of the database.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The normalized project shape every matcher component consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub slug: Option<String>,
    pub name: String,
    pub description: String,
    /// A stage-ladder value (see `models::stages`).
    pub stage: String,
    pub sectors: Vec<String>,
    pub goals: Vec<String>,
    pub funding_need: f64,
}

/// Request body for `POST /projects`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectIn {
    pub name: String,
    pub description: String,
    pub stage: String,
    #[serde(default)]
    pub sectors: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    pub funding_need: Option<f64>,
}

/// Derives a URL-safe slug from a project name. Arabic letters are kept.
pub fn slugify(name: &str) -> String {
    lazy_static::lazy_static! {
        static ref WS_RE: regex::Regex = regex::Regex::new(r"\s+").unwrap();
        static ref NON_WORD_RE: regex::Regex = regex::Regex::new(r"[^\w\-]+").unwrap();
    }
    let s = name.trim().to_lowercase();
    let s = WS_RE.replace_all(&s, "-");
    let s = NON_WORD_RE.replace_all(&s, "");
    let s = s.trim_matches('-').to_string();
    if s.is_empty() {
        "project".to_string()
    } else {
        s
    }
}

/// Coerces a stored column into a list of non-empty strings. Accepts a
/// JSON array, a JSON-encoded array string, or a comma-separated string —
/// all three shapes exist in project rows sourced from forms and imports.
pub fn coerce_str_list(value: &Value) -> Vec<String> {
    fn from_items(items: &[Value]) -> Vec<String> {
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect()
    }

    match value {
        Value::Array(items) => from_items(items),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return vec![];
            }
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(s) {
                return from_items(&items);
            }
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        }
        _ => vec![],
    }
}
