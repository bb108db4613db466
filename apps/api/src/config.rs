use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::matcher::calibrate::Calibration;
use crate::matcher::scoring::Weights;

/// Application configuration loaded from environment variables.
/// Missing required variables are fatal at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub openai_api_key: String,
    /// Persistence directory for the vector index.
    pub index_path: PathBuf,
    pub collection_name: String,
    pub embed_model: String,
    pub llm_model: String,
    pub llm_seed: i64,
    pub llm_temperature: f32,
    pub match_top_k: usize,
    pub match_calibration: Calibration,
    /// Candidate pool multiplier: the orchestrator retrieves
    /// `max(top_k * multiplier, 50)` before ranking.
    pub match_retrieval_multiplier: usize,
    pub match_weights: Weights,
    pub match_table: String,
    /// Directory of source Markdown program descriptions (build-index input).
    pub data_path: PathBuf,
    /// Directory for the structured JSON program records (build-index output).
    pub programs_dir: PathBuf,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let data_path =
            PathBuf::from(std::env::var("DATA_PATH").unwrap_or_else(|_| "data".to_string()));
        let programs_dir = std::env::var("PROGRAMS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_path.join("programs"));

        let match_calibration = std::env::var("MATCH_CALIBRATION")
            .unwrap_or_else(|_| "relative_minmax".to_string())
            .parse::<Calibration>()
            .map_err(|e| anyhow::anyhow!("MATCH_CALIBRATION: {e}"))?;

        let match_weights = match std::env::var("MATCH_WEIGHTS") {
            Ok(raw) => Weights::parse(&raw).map_err(|e| anyhow::anyhow!("MATCH_WEIGHTS: {e}"))?,
            Err(_) => Weights::BALANCED,
        };

        let match_retrieval_multiplier = parse_env("MATCH_RETRIEVAL_MULTIPLIER", 10usize)?;
        if match_retrieval_multiplier == 0 {
            bail!("MATCH_RETRIEVAL_MULTIPLIER must be >= 1");
        }

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            openai_api_key: require_env("OPENAI_API_KEY")?,
            index_path: PathBuf::from(
                std::env::var("INDEX_PATH").unwrap_or_else(|_| "program_index".to_string()),
            ),
            collection_name: std::env::var("COLLECTION_NAME")
                .unwrap_or_else(|_| "programs_index".to_string()),
            embed_model: std::env::var("EMBED_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            llm_seed: parse_env("LLM_SEED", 42i64)?,
            llm_temperature: parse_env("LLM_TEMPERATURE", 0.0f32)?,
            match_top_k: parse_env("MATCH_TOP_K", 5usize)?,
            match_calibration,
            match_retrieval_multiplier,
            match_weights,
            match_table: std::env::var("MATCH_TABLE")
                .unwrap_or_else(|_| "match_results".to_string()),
            data_path,
            programs_dir,
            port: parse_env("PORT", 8080u16)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}
