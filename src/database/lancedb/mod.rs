// LanceDB vector database module
// Element embeddings, typed metadata filters and the resilient store wrapper

#[cfg(test)]
mod tests;

pub mod backend;
pub mod corruption;
pub mod filter;
pub mod vector_store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extraction::ElementType;

pub use backend::{IndexBackend, LanceBackend};
pub use filter::{FilterField, FilterValue, MetadataFilter};
pub use vector_store::{DocumentVectorStats, StoreState, StoreStats, VectorStore};

/// Typed failure taxonomy at the storage-driver boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The on-disk index could not be read; recoverable by a reset
    #[error("vector index corrupted: {0}")]
    Corrupt(String),
    #[error("vector index operation failed: {0}")]
    Backend(String),
    /// Input rejected before it reached the index
    #[error("vector index request rejected: {0}")]
    Rejected(String),
    #[error("vector index unrecoverable after reset: {0}")]
    Unrecoverable(String),
}

impl StoreError {
    #[inline]
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corrupt(_))
    }
}

/// Embedding record stored in LanceDB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Store-generated identifier, distinct from the element id
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ElementMetadata,
    /// Text the vector was computed from
    pub plain_text: String,
    pub created_at: String,
}

/// Metadata stored alongside each embedding and usable in filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementMetadata {
    pub element_id: String,
    pub document_id: String,
    pub page_number: u32,
    pub element_type: ElementType,
}

/// Nearest-neighbour hit as returned by the index, before any ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    pub store_id: String,
    pub metadata: ElementMetadata,
    pub plain_text: String,
    /// Cosine distance to the query vector
    pub distance: f32,
}
