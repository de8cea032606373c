#[cfg(test)]
mod tests;

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    ElementMetadata, EmbeddingRecord, IndexBackend, LanceBackend, MetadataFilter, RawHit,
    StoreError,
};
use crate::config::Config;

/// Recovery state of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StoreState {
    Healthy,
    CollectionCorrupt,
    StoreCorrupt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_embeddings: usize,
    pub collection_name: String,
}

/// Per-document embedding counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentVectorStats {
    pub document_id: String,
    pub embeddings: usize,
    pub pages: usize,
}

struct Inner {
    backend: Box<dyn IndexBackend>,
    state: StoreState,
    resets: u64,
}

/// Run a backend call, and on corruption reset once and retry once.
///
/// The expression is evaluated a second time for the retry, so it must only
/// borrow from the surrounding scope.
macro_rules! with_recovery {
    ($inner:ident, $operation:literal, $call:expr) => {{
        let first = $call;
        match first {
            Ok(value) => {
                $inner.state = StoreState::Healthy;
                Ok(value)
            }
            Err(cause) if cause.is_corruption() => match $inner.recover($operation, &cause).await {
                Ok(()) => {
                    let retried = $call;
                    match retried {
                        Ok(value) => {
                            info!("{} succeeded after recovery", $operation);
                            $inner.state = StoreState::Healthy;
                            Ok(value)
                        }
                        Err(retry) if retry.is_corruption() => Err(StoreError::Unrecoverable(
                            format!("{} failed after reset: {}", $operation, retry),
                        )),
                        Err(retry) => {
                            // the reset itself completed
                            $inner.state = StoreState::Healthy;
                            Err(retry)
                        }
                    }
                }
                Err(reset) => Err(reset),
            },
            Err(other) => Err(other),
        }
    }};
}

impl Inner {
    /// Collection reset first, full store reset if that fails
    async fn recover(&mut self, operation: &str, cause: &StoreError) -> Result<(), StoreError> {
        warn!(
            "Corruption detected during {}, resetting collection: {}",
            operation, cause
        );
        self.state = StoreState::CollectionCorrupt;

        match self.backend.reset_collection().await {
            Ok(()) => {
                self.record_reset(operation);
                return Ok(());
            }
            Err(e) => error!("Collection reset failed, resetting store: {}", e),
        }

        self.state = StoreState::StoreCorrupt;
        self.backend.reset_store().await.map_err(|e| {
            error!("Store reset failed: {}", e);
            StoreError::Unrecoverable(format!("store reset failed: {}", e))
        })?;
        self.record_reset(operation);
        Ok(())
    }

    fn record_reset(&mut self, operation: &str) {
        self.resets += 1;
        warn!(
            "Vector store reset during {} dropped every stored embedding; documents ingested before it must be re-ingested",
            operation
        );
    }
}

/// Vector index of page elements, safe against on-disk corruption.
///
/// Every public operation takes the whole-store lock, so a reset can never
/// interleave with another read or write.
pub struct VectorStore {
    inner: Mutex<Inner>,
}

impl VectorStore {
    /// Open the LanceDB store under the configured base directory
    #[inline]
    pub async fn open(config: &Config) -> Result<Self, StoreError> {
        let backend = LanceBackend::open(
            &config.vector_database_path(),
            &config.storage.collection_name,
        )
        .await?;
        Ok(Self::with_backend(Box::new(backend)))
    }

    #[inline]
    pub fn with_backend(backend: Box<dyn IndexBackend>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                backend,
                state: StoreState::Healthy,
                resets: 0,
            }),
        }
    }

    #[inline]
    pub async fn state(&self) -> StoreState {
        self.inner.lock().await.state
    }

    /// Number of resets since the store was opened, forced ones included.
    ///
    /// A change across a sequence of writes means earlier writes were dropped.
    #[inline]
    pub async fn resets(&self) -> u64 {
        self.inner.lock().await.resets
    }

    /// Insert one embedding under a fresh store id.
    ///
    /// Returns `Ok(false)` for faults that recovery does not apply to and
    /// `Err(StoreError::Unrecoverable)` when recovery itself failed.
    #[inline]
    pub async fn add(
        &self,
        element_id: &str,
        plain_text: &str,
        vector: Vec<f32>,
        metadata: ElementMetadata,
    ) -> Result<bool, StoreError> {
        if element_id != metadata.element_id {
            error!(
                "Element id {} does not match metadata element id {}",
                element_id, metadata.element_id
            );
            return Ok(false);
        }

        let record = EmbeddingRecord {
            id: Uuid::new_v4().to_string(),
            vector,
            metadata,
            plain_text: plain_text.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };

        let mut inner = self.inner.lock().await;
        match with_recovery!(inner, "add", inner.backend.insert(&record).await) {
            Ok(()) => {
                debug!("Added embedding {} for {}", record.id, element_id);
                Ok(true)
            }
            Err(e @ StoreError::Unrecoverable(_)) => {
                error!("Failed to add embedding for {}: {}", element_id, e);
                Err(e)
            }
            Err(e) => {
                error!("Failed to add embedding for {}: {}", element_id, e);
                Ok(false)
            }
        }
    }

    /// Nearest neighbours of `query` among records matching `filter`
    ///
    /// `None` signals failure; an empty vector means nothing matched.
    #[inline]
    pub async fn search(
        &self,
        query: &[f32],
        filter: &MetadataFilter,
        top_k: usize,
    ) -> Option<Vec<RawHit>> {
        if let Err(e) = filter.validate() {
            error!("Search rejected: {}", e);
            return None;
        }
        if top_k == 0 {
            return Some(Vec::new());
        }

        let mut inner = self.inner.lock().await;
        match with_recovery!(inner, "search", inner.backend.query(query, filter, top_k).await) {
            Ok(hits) => {
                debug!("Search returned {} hits", hits.len());
                Some(hits)
            }
            Err(e) => {
                error!("Search failed: {}", e);
                None
            }
        }
    }

    /// Remove every record matching `filter`; zero matches still succeeds
    #[inline]
    pub async fn delete_by_metadata(&self, filter: &MetadataFilter) -> bool {
        if let Err(e) = filter.validate() {
            error!("Delete rejected: {}", e);
            return false;
        }

        let mut inner = self.inner.lock().await;
        match with_recovery!(inner, "delete", inner.backend.delete(filter).await) {
            Ok(()) => true,
            Err(e) => {
                error!("Delete failed: {}", e);
                false
            }
        }
    }

    #[inline]
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut inner = self.inner.lock().await;
        let total_embeddings = with_recovery!(inner, "stats", inner.backend.count().await)?;
        Ok(StoreStats {
            total_embeddings,
            collection_name: inner.backend.collection_name().to_string(),
        })
    }

    /// Embedding and page counts grouped by document
    #[inline]
    pub async fn document_stats(&self) -> Result<Vec<DocumentVectorStats>, StoreError> {
        let mut inner = self.inner.lock().await;
        let metadata = with_recovery!(inner, "document stats", inner.backend.scan(None).await)?;

        let mut grouped: BTreeMap<String, (usize, Vec<u32>)> = BTreeMap::new();
        for entry in metadata {
            let (count, pages) = grouped.entry(entry.document_id).or_default();
            *count += 1;
            if !pages.contains(&entry.page_number) {
                pages.push(entry.page_number);
            }
        }

        Ok(grouped
            .into_iter()
            .map(|(document_id, (embeddings, pages))| DocumentVectorStats {
                document_id,
                embeddings,
                pages: pages.len(),
            })
            .collect())
    }

    /// Cheap count check; never runs recovery
    #[inline]
    pub async fn is_healthy(&self) -> bool {
        let inner = self.inner.lock().await;
        match inner.backend.count().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Vector store health check failed: {}", e);
                false
            }
        }
    }

    /// Drop and recreate the collection, falling back to a store reset
    #[inline]
    pub async fn force_reset(&self) -> bool {
        let mut inner = self.inner.lock().await;
        warn!("Forcing reset of collection {}", inner.backend.collection_name());

        let reset = match inner.backend.reset_collection().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Collection reset failed, resetting store: {}", e);
                inner.state = StoreState::StoreCorrupt;
                inner.backend.reset_store().await
            }
        };

        if let Err(e) = reset {
            error!("Forced reset failed: {}", e);
            return false;
        }
        inner.resets += 1;

        match inner.backend.count().await {
            Ok(_) => {
                inner.state = StoreState::Healthy;
                info!("Vector store reset completed");
                true
            }
            Err(e) => {
                error!("Vector store unhealthy after reset: {}", e);
                false
            }
        }
    }
}
