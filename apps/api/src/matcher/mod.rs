// Program Matcher — hybrid retrieval-and-ranking pipeline.
// Flow: retrieval (vector store) → per-candidate LLM-judged granular
// scoring → weighted fusion → presentation calibration → violation
// derivation → payload packing → persistence.
// All LLM calls go through llm_client — no direct API calls here.

pub mod calibrate;
pub mod error;
pub mod handlers;
pub mod persist;
pub mod prompts;
pub mod retrieval;
pub mod scoring;
pub mod service;
pub mod violations;
