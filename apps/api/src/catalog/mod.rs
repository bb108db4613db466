// Catalog build pipeline: Markdown program descriptions → structured
// records → persistent vector index. Runs as the `build-index` binary,
// never at query time.

pub mod builder;
pub mod extractor;
pub mod prompts;
