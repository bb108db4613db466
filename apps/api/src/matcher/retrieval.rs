//! Retriever — builds the query text for a project and pulls a broad
//! candidate pool from the vector store.

use crate::models::project::Project;
use crate::vector_store::{Document, StoreError, VectorStore};

/// Floor on the retrieval pool so the top-K export always has ranking
/// headroom, even for small `top_k`.
pub const MIN_RETRIEVAL_POOL: usize = 50;

/// Pool size for a run: `max(top_k * multiplier, 50)`.
pub fn retrieval_pool_size(top_k: usize, multiplier: usize) -> usize {
    (top_k * multiplier).max(MIN_RETRIEVAL_POOL)
}

/// One query string carrying every matching dimension of the project.
pub fn build_query_text(project: &Project) -> String {
    format!(
        "{}\n{}\nSectors: {}\nStage: {}\nFundingNeed:{}\nGoals:{}",
        project.name.trim(),
        project.description.trim(),
        project.sectors.join(", "),
        project.stage,
        project.funding_need,
        project.goals.join(", "),
    )
}

/// Retrieves up to `k` candidates as `(document, cosine distance)` pairs,
/// closest first. Pairs with a non-finite distance are dropped. Downstream
/// ranking must not rely on this ordering — the granular scorer re-sorts
/// on the fused score.
pub async fn retrieve_candidates(
    store: &VectorStore,
    project: &Project,
    k: usize,
) -> Result<Vec<(Document, f64)>, StoreError> {
    let query = build_query_text(project);
    let hits = store.similarity_search_with_score(&query, k).await?;
    Ok(hits
        .into_iter()
        .filter(|(_, distance)| distance.is_finite())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn project() -> Project {
        Project {
            id: Uuid::nil(),
            slug: Some("clinic-os".to_string()),
            name: "Clinic OS".to_string(),
            description: "منصة إدارة عيادات".to_string(),
            stage: "MVP".to_string(),
            sectors: vec!["الصحة".to_string(), "تقنية صحية".to_string()],
            goals: vec!["نمو".to_string(), "توسع إقليمي".to_string()],
            funding_need: 250000.0,
        }
    }

    #[test]
    fn test_query_text_layout() {
        let text = build_query_text(&project());
        assert_eq!(
            text,
            "Clinic OS\nمنصة إدارة عيادات\nSectors: الصحة, تقنية صحية\nStage: MVP\nFundingNeed:250000\nGoals:نمو, توسع إقليمي"
        );
    }

    #[test]
    fn test_query_text_empty_lists() {
        let mut p = project();
        p.sectors.clear();
        p.goals.clear();
        let text = build_query_text(&p);
        assert!(text.contains("Sectors: \n"));
        assert!(text.ends_with("Goals:"));
    }

    #[test]
    fn test_pool_size_floor_and_multiplier() {
        assert_eq!(retrieval_pool_size(5, 10), 50);
        assert_eq!(retrieval_pool_size(3, 10), 50);
        assert_eq!(retrieval_pool_size(10, 10), 100);
        assert_eq!(retrieval_pool_size(1, 1), 50);
    }
}
