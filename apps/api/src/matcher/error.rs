use thiserror::Error;

use crate::llm_client::LlmError;

/// Run-level matcher errors. Anything that reaches the caller as a typed
/// error here means no rows were persisted for the run.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid project input: {0}")]
    Input(String),

    #[error("vector index unavailable: {0}")]
    Index(String),

    #[error("match run deadline exceeded")]
    Deadline,

    #[error("persistence failed: {0}")]
    Persistence(String),
}

/// Per-candidate scoring failures. These drop the candidate from the run
/// (logged with the program id) and never fail the run on their own.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("no JSON object found in reply")]
    NoJson,

    #[error("malformed JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("scoring call timed out")]
    Timeout,
}
