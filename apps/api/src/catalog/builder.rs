//! Program Index Builder — materializes structured program records as
//! JSON files and embeds them into the persistent vector store.
//!
//! Two passes, mirroring the build flow:
//! 1. `convert_markdown_dir`: every `*.md` under the data directory is
//!    extracted into `<programs_dir>/<slug>.json` with a unique slug.
//! 2. `index_catalog`: every JSON record becomes one index document whose
//!    text concatenates the searchable fields; metadata carries the
//!    primitive-filtered record.
//!
//! Slug collisions are broken deterministically (`-2`, `-3`, ...) so the
//! build is idempotent for identical inputs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::catalog::extractor::{extract_program, slug_ar_lat};
use crate::llm_client::LlmClient;
use crate::models::program::Program;
use crate::vector_store::{Document, VectorStore};

/// Converts every Markdown file under `md_dir` into a structured JSON
/// record under `out_dir`. Returns the written record paths in input
/// order. A single failing document is skipped, not fatal.
pub async fn convert_markdown_dir(
    md_dir: &Path,
    out_dir: &Path,
    llm: &LlmClient,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Cannot create {}", out_dir.display()))?;

    let mut md_files: Vec<PathBuf> = WalkDir::new(md_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "md"))
        .collect();
    md_files.sort();

    if md_files.is_empty() {
        bail!("No Markdown files found in {}", md_dir.display());
    }

    let mut taken: HashSet<String> = HashSet::new();
    let mut written = vec![];

    for md_path in md_files {
        let markdown = match std::fs::read_to_string(&md_path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping unreadable {}: {e}", md_path.display());
                continue;
            }
        };

        let mut program = extract_program(&markdown, "", llm).await;

        let base = slug_ar_lat(&program.id);
        let slug = make_unique_slug(&base, &mut taken, out_dir);
        program.id = slug.clone();
        program.source_path = Some(md_path.to_string_lossy().replace('\\', "/"));

        let out_path = out_dir.join(format!("{slug}.json"));
        let json = serde_json::to_string_pretty(&program)?;
        std::fs::write(&out_path, json)
            .with_context(|| format!("Cannot write {}", out_path.display()))?;
        written.push(out_path);
    }

    info!("Converted {} program records to {}", written.len(), out_dir.display());
    Ok(written)
}

/// De-duplicates a slug against both this run and records already on disk.
pub fn make_unique_slug(base: &str, taken: &mut HashSet<String>, out_dir: &Path) -> String {
    let mut slug = base.to_string();
    let mut n = 2;
    while taken.contains(&slug) || out_dir.join(format!("{slug}.json")).exists() {
        slug = format!("{base}-{n}");
        n += 1;
    }
    taken.insert(slug.clone());
    slug
}

/// Loads every JSON record under `out_dir` into the vector store and
/// persists the collection. Returns the number of indexed documents.
pub async fn index_catalog(out_dir: &Path, store: &mut VectorStore) -> Result<usize> {
    let mut json_files: Vec<PathBuf> = WalkDir::new(out_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
        .collect();
    json_files.sort();

    if json_files.is_empty() {
        bail!(
            "No JSON records under {} — run the Markdown step first",
            out_dir.display()
        );
    }

    let mut docs = vec![];
    for path in &json_files {
        let raw = std::fs::read_to_string(path)?;
        let program: Program = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt program record {}", path.display()))?;
        docs.push(Document {
            page_content: index_text(&program),
            metadata: program.to_metadata(),
        });
    }

    let added = store.add_documents(docs).await?;
    store.save()?;
    info!(
        "Indexed {} programs into collection '{}'",
        added,
        store.collection()
    );
    Ok(added)
}

/// The embedded text for one program: name, narrative fields, and the
/// tag lists, one section per line.
pub fn index_text(program: &Program) -> String {
    let objectives = if program.objectives.is_empty() {
        program.objectives_text.clone().unwrap_or_default()
    } else {
        program.objectives.clone()
    };
    [
        program.name.clone(),
        program.description.clone(),
        objectives,
        format!("Goals {}", program.goals.join(", ")),
        format!("Features {}", program.features.join(", ")),
        format!("Eligibility {}", program.eligibility_must.join(", ")),
        format!("Sectors {}", program.sector_tags.join(", ")),
        format!("Stages {}", program.stage_tags.join(", ")),
    ]
    .join("\n")
    .trim()
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_slug_appends_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut taken = HashSet::new();
        assert_eq!(make_unique_slug("prog", &mut taken, dir.path()), "prog");
        assert_eq!(make_unique_slug("prog", &mut taken, dir.path()), "prog-2");
        assert_eq!(make_unique_slug("prog", &mut taken, dir.path()), "prog-3");
    }

    #[test]
    fn test_unique_slug_respects_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prog.json"), "{}").unwrap();
        let mut taken = HashSet::new();
        assert_eq!(make_unique_slug("prog", &mut taken, dir.path()), "prog-2");
    }

    #[test]
    fn test_index_text_concatenates_all_sections() {
        let program = Program {
            id: "p1".into(),
            name: "برنامج أ".into(),
            description: "وصف".into(),
            objectives: "هدف عام".into(),
            goals: vec!["نمو".into(), "توظيف".into()],
            sector_tags: vec!["الصحة".into()],
            stage_tags: vec!["MVP".into()],
            ..Default::default()
        };
        let text = index_text(&program);
        assert!(text.starts_with("برنامج أ\nوصف\nهدف عام"));
        assert!(text.contains("Goals نمو, توظيف"));
        assert!(text.contains("Sectors الصحة"));
        assert!(text.contains("Stages MVP"));
    }

    #[test]
    fn test_index_text_falls_back_to_objectives_text() {
        let program = Program {
            name: "ب".into(),
            objectives_text: Some("ملخص الأهداف".into()),
            ..Default::default()
        };
        assert!(index_text(&program).contains("ملخص الأهداف"));
    }
}
