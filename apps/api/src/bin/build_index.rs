//! Batch catalog build: Markdown program descriptions → structured JSON
//! records → persistent vector index.
//!
//! Usage: `build-index` with the same environment as the API service.
//! Idempotent for identical inputs: slugs collide deterministically and
//! re-embedding the same texts yields the same index.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api::catalog::builder::{convert_markdown_dir, index_catalog};
use api::config::Config;
use api::llm_client::{LlmClient, OpenAiEmbeddings};
use api::vector_store::VectorStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Building catalog: {} -> {} -> collection '{}'",
        config.data_path.display(),
        config.programs_dir.display(),
        config.collection_name
    );

    let llm = LlmClient::new(
        config.openai_api_key.clone(),
        config.llm_model.clone(),
        config.llm_temperature,
        config.llm_seed,
    );

    let written = convert_markdown_dir(&config.data_path, &config.programs_dir, &llm).await?;
    info!("Converted {} Markdown documents", written.len());

    let embedder = Arc::new(OpenAiEmbeddings::new(
        config.openai_api_key.clone(),
        config.embed_model.clone(),
    ));
    let mut store = VectorStore::open(
        &config.collection_name,
        &config.index_path,
        &config.embed_model,
        embedder,
    )?;
    let indexed = index_catalog(&config.programs_dir, &mut store).await?;

    info!(
        "Index ready: collection '{}' now holds {} documents ({} added)",
        store.collection(),
        store.len(),
        indexed
    );
    Ok(())
}
