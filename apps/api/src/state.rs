use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::vector_store::VectorStore;

/// Shared application state injected into all route handlers via Axum
/// extractors. The vector store handle is loaded once at startup and
/// shared read-only across concurrent match runs.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub llm: LlmClient,
    pub store: Arc<VectorStore>,
    pub config: Config,
}
