use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api::config::Config;
use api::db::create_pool;
use api::llm_client::{LlmClient, OpenAiEmbeddings};
use api::routes::build_router;
use api::state::AppState;
use api::vector_store::VectorStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Program Matcher API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize LLM client (temperature and seed fixed for the process)
    let llm = LlmClient::new(
        config.openai_api_key.clone(),
        config.llm_model.clone(),
        config.llm_temperature,
        config.llm_seed,
    );
    info!("LLM client initialized (model: {})", llm.model());

    // Open the vector store once; match runs share the handle read-only
    let embedder = Arc::new(OpenAiEmbeddings::new(
        config.openai_api_key.clone(),
        config.embed_model.clone(),
    ));
    let store = VectorStore::open(
        &config.collection_name,
        &config.index_path,
        &config.embed_model,
        embedder,
    )?;
    if store.is_empty() {
        info!(
            "Collection '{}' is empty — run `build-index` to populate it",
            store.collection()
        );
    }

    // Build app state
    let state = AppState {
        db,
        llm,
        store: Arc::new(store),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
