// Retrieval module
// Vector search scoped to one document, then ranking into bounded evidence


use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::lancedb::{MetadataFilter, RawHit, VectorStore};
use crate::extraction::ElementType;

pub const DEFAULT_FLOWCHART_BOOST: f64 = 1.1;
pub const DEFAULT_RELEVANCE_FLOOR: f64 = 0.5;
pub const DEFAULT_MAX_RESULTS: usize = 2;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingConfig {
    /// Multiplier applied to flowchart similarities
    pub flowchart_boost: f64,
    /// Hits must score strictly above this to be kept
    pub relevance_floor: f64,
    /// Evidence cap, independent of the search depth
    pub max_results: usize,
    /// Search depth used when a request does not give one
    pub default_top_k: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            flowchart_boost: DEFAULT_FLOWCHART_BOOST,
            relevance_floor: DEFAULT_RELEVANCE_FLOOR,
            max_results: DEFAULT_MAX_RESULTS,
            default_top_k: DEFAULT_TOP_K,
        }
    }
}

/// One ranked piece of supporting content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub element_type: ElementType,
    pub plain_text: String,
    /// Boosted similarity in `(relevance_floor, 1.0]`, rounded to 3 decimals
    pub similarity_score: f64,
    pub page_number: u32,
    pub element_id: String,
}

/// Cosine similarity of a hit after the type boost, clamped to 1.0
#[inline]
pub fn boosted_similarity(hit: &RawHit, config: &RankingConfig) -> f64 {
    let similarity = (1.0 - f64::from(hit.distance)).min(1.0);
    match hit.metadata.element_type {
        ElementType::Flowchart => (similarity * config.flowchart_boost).min(1.0),
        ElementType::Text => similarity,
    }
}

#[inline]
pub fn round_score(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}

/// Turn raw hits into at most `max_results` evidence items, one per page.
///
/// Ordering and page deduplication use the unrounded score; rounding is
/// applied to the returned values only. A hit must clear the floor both before
/// and after rounding, so no returned score equals the floor.
#[inline]
pub fn rank_hits(hits: Vec<RawHit>, config: &RankingConfig) -> Vec<Evidence> {
    let mut scored: Vec<(f64, RawHit)> = hits
        .into_iter()
        .map(|hit| (boosted_similarity(&hit, config), hit))
        .filter(|(score, _)| {
            *score > config.relevance_floor && round_score(*score) > config.relevance_floor
        })
        .collect();

    // sort_by is stable, so equal scores keep retrieval order
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    scored
        .into_iter()
        .unique_by(|(_, hit)| hit.metadata.page_number)
        .take(config.max_results)
        .map(|(score, hit)| Evidence {
            element_type: hit.metadata.element_type,
            plain_text: hit.plain_text,
            similarity_score: round_score(score),
            page_number: hit.metadata.page_number,
            element_id: hit.metadata.element_id,
        })
        .collect()
}

/// Finds the evidence in one document most similar to a query embedding
pub struct Retriever {
    store: Arc<VectorStore>,
    config: RankingConfig,
}

impl Retriever {
    #[inline]
    pub fn new(store: Arc<VectorStore>, config: RankingConfig) -> Self {
        Self { store, config }
    }

    #[inline]
    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Ranked evidence from `document_id`; empty when nothing relevant is found
    #[inline]
    pub async fn search_similar_content(
        &self,
        document_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Vec<Evidence> {
        let filter = MetadataFilter::document(document_id);
        let Some(hits) = self.store.search(query_embedding, &filter, top_k).await else {
            return Vec::new();
        };

        let candidates = hits.len();
        let evidence = rank_hits(hits, &self.config);

        info!(
            "Retrieved {} evidence items from {} candidates in {}",
            evidence.len(),
            candidates,
            document_id
        );
        for item in &evidence {
            debug!(
                "Evidence {} (page {}, {}) score {:.3}",
                item.element_id, item.page_number, item.element_type, item.similarity_score
            );
        }

        evidence
    }
}
