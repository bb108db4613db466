//! Persistent vector store with cosine similarity.
//!
//! One named collection is a single JSON file under the persistence
//! directory holding every indexed document with its embedding. The store
//! embeds queries through the `Embeddings` seam and scans in-process —
//! the catalog is a few hundred programs, not millions of chunks.
//!
//! A loaded handle is read-only and safe to share across concurrent match
//! runs; only the batch index builder mutates a store.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::llm_client::{Embeddings, LlmError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Collection file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Collection mismatch: requested '{requested}', file holds '{found}'")]
    CollectionMismatch { requested: String, found: String },

    #[error("Embedding error: {0}")]
    Embedding(#[from] LlmError),
}

/// An indexed document: the embedded text plus the primitive-filtered
/// program record it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    page_content: String,
    metadata: Map<String, Value>,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile {
    collection: String,
    embed_model: String,
    documents: Vec<StoredDocument>,
}

pub struct VectorStore {
    collection: String,
    file_path: PathBuf,
    embed_model: String,
    embedder: Arc<dyn Embeddings>,
    documents: Vec<StoredDocument>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("collection", &self.collection)
            .field("file_path", &self.file_path)
            .field("embed_model", &self.embed_model)
            .field("documents", &self.documents)
            .finish()
    }
}

impl VectorStore {
    /// Opens (or creates) the named collection under `persist_dir`.
    ///
    /// The directory is created if missing. An existing file recorded under
    /// a different collection name is refused — the store never silently
    /// serves another collection's documents.
    pub fn open(
        collection: &str,
        persist_dir: &Path,
        embed_model: &str,
        embedder: Arc<dyn Embeddings>,
    ) -> Result<Self, StoreError> {
        std::fs::create_dir_all(persist_dir)?;
        let file_path = persist_dir.join(format!("{collection}.json"));

        let documents = if file_path.exists() {
            let raw = std::fs::read_to_string(&file_path)?;
            let file: CollectionFile = serde_json::from_str(&raw)?;
            if file.collection != collection {
                return Err(StoreError::CollectionMismatch {
                    requested: collection.to_string(),
                    found: file.collection,
                });
            }
            if file.embed_model != embed_model {
                warn!(
                    "Collection '{}' was embedded with '{}' but '{}' is configured",
                    collection, file.embed_model, embed_model
                );
            }
            info!(
                "Loaded collection '{}' ({} documents) from {}",
                collection,
                file.documents.len(),
                file_path.display()
            );
            file.documents
        } else {
            info!(
                "Collection '{}' not found at {} — starting empty",
                collection,
                file_path.display()
            );
            vec![]
        };

        Ok(Self {
            collection: collection.to_string(),
            file_path,
            embed_model: embed_model.to_string(),
            embedder,
            documents,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Embeds and appends documents. Call `save` afterwards to persist.
    pub async fn add_documents(&mut self, docs: Vec<Document>) -> Result<usize, StoreError> {
        if docs.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = docs.iter().map(|d| d.page_content.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        let added = docs.len();
        for (doc, embedding) in docs.into_iter().zip(embeddings) {
            self.documents.push(StoredDocument {
                page_content: doc.page_content,
                metadata: doc.metadata,
                embedding,
            });
        }
        Ok(added)
    }

    /// Writes the collection file atomically (temp file + rename).
    pub fn save(&self) -> Result<(), StoreError> {
        let file = CollectionFile {
            collection: self.collection.clone(),
            embed_model: self.embed_model.clone(),
            documents: self
                .documents
                .iter()
                .map(|d| StoredDocument {
                    page_content: d.page_content.clone(),
                    metadata: d.metadata.clone(),
                    embedding: d.embedding.clone(),
                })
                .collect(),
        };
        let dir = self.file_path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string(&file)?.as_bytes())?;
        tmp.persist(&self.file_path)
            .map_err(|e| StoreError::Io(e.error))?;
        info!(
            "Persisted collection '{}' ({} documents)",
            self.collection,
            self.documents.len()
        );
        Ok(())
    }

    /// Top-k nearest documents by cosine distance (ascending, in [0, 2]).
    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Document, f64)>, StoreError> {
        if self.documents.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(LlmError::EmbeddingMismatch { sent: 1, got: 0 })?;

        let mut scored: Vec<(usize, f64)> = self
            .documents
            .iter()
            .enumerate()
            .map(|(i, doc)| (i, cosine_distance(&query_embedding, &doc.embedding)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, distance)| {
                let doc = &self.documents[i];
                (
                    Document {
                        page_content: doc.page_content.clone(),
                        metadata: doc.metadata.clone(),
                    },
                    distance,
                )
            })
            .collect())
    }
}

/// Cosine distance `1 - cos(u, v)` in [0, 2]. Zero-norm vectors are
/// treated as orthogonal (distance 1).
pub fn cosine_distance(u: &[f32], v: &[f32]) -> f64 {
    let n = u.len().min(v.len());
    let mut dot = 0.0f64;
    let mut norm_u = 0.0f64;
    let mut norm_v = 0.0f64;
    for i in 0..n {
        dot += f64::from(u[i]) * f64::from(v[i]);
        norm_u += f64::from(u[i]) * f64::from(u[i]);
        norm_v += f64::from(v[i]) * f64::from(v[i]);
    }
    if norm_u == 0.0 || norm_v == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_u.sqrt() * norm_v.sqrt())).clamp(0.0, 2.0)
}
