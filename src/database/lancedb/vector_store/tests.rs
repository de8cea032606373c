use super::*;
use crate::extraction::ElementType;
use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex};
use tempfile::TempDir;

/// Fault schedule and counters shared between a test and its backend
#[derive(Debug, Default)]
struct FaultPlan {
    corrupt_next: usize,
    backend_error_next: usize,
    fail_collection_reset: bool,
    fail_store_reset: bool,
    collection_resets: usize,
    store_resets: usize,
}

struct FaultyBackend {
    records: Vec<EmbeddingRecord>,
    faults: Arc<StdMutex<FaultPlan>>,
}

impl FaultyBackend {
    fn check(&self) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().expect("fault plan lock");
        if faults.corrupt_next > 0 {
            faults.corrupt_next -= 1;
            return Err(StoreError::Corrupt("index segment unreadable".to_string()));
        }
        if faults.backend_error_next > 0 {
            faults.backend_error_next -= 1;
            return Err(StoreError::Backend("disk full".to_string()));
        }
        Ok(())
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl IndexBackend for FaultyBackend {
    fn collection_name(&self) -> &str {
        "page_elements"
    }

    async fn insert(&mut self, record: &EmbeddingRecord) -> Result<(), StoreError> {
        self.check()?;
        self.records.push(record.clone());
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<RawHit>, StoreError> {
        self.check()?;
        let mut hits: Vec<RawHit> = self
            .records
            .iter()
            .filter(|record| filter.matches(&record.metadata))
            .map(|record| RawHit {
                store_id: record.id.clone(),
                metadata: record.metadata.clone(),
                plain_text: record.plain_text.clone(),
                distance: cosine_distance(vector, &record.vector),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scan(
        &self,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ElementMetadata>, StoreError> {
        self.check()?;
        Ok(self
            .records
            .iter()
            .filter(|record| filter.is_none_or(|f| f.matches(&record.metadata)))
            .map(|record| record.metadata.clone())
            .collect())
    }

    async fn delete(&mut self, filter: &MetadataFilter) -> Result<(), StoreError> {
        self.check()?;
        self.records.retain(|record| !filter.matches(&record.metadata));
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.check()?;
        Ok(self.records.len())
    }

    async fn reset_collection(&mut self) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().expect("fault plan lock");
        faults.collection_resets += 1;
        if faults.fail_collection_reset {
            return Err(StoreError::Backend("cannot drop table".to_string()));
        }
        self.records.clear();
        Ok(())
    }

    async fn reset_store(&mut self) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().expect("fault plan lock");
        faults.store_resets += 1;
        if faults.fail_store_reset {
            return Err(StoreError::Backend("cannot remove directory".to_string()));
        }
        self.records.clear();
        Ok(())
    }
}

fn faulty_store() -> (VectorStore, Arc<StdMutex<FaultPlan>>) {
    let faults = Arc::new(StdMutex::new(FaultPlan::default()));
    let backend = FaultyBackend {
        records: Vec::new(),
        faults: Arc::clone(&faults),
    };
    (VectorStore::with_backend(Box::new(backend)), faults)
}

fn metadata(document_id: &str, page_number: u32, element_type: ElementType) -> ElementMetadata {
    ElementMetadata {
        element_id: crate::extraction::element_id(document_id, page_number, element_type),
        document_id: document_id.to_string(),
        page_number,
        element_type,
    }
}

async fn add(store: &VectorStore, metadata: ElementMetadata, vector: Vec<f32>) -> Result<bool, StoreError> {
    let element_id = metadata.element_id.clone();
    store.add(&element_id, "content", vector, metadata).await
}

#[tokio::test]
async fn corruption_on_search_resets_collection_once_and_retries() {
    let (store, faults) = faulty_store();
    add(&store, metadata("Doc_00000001", 1, ElementType::Text), vec![1.0, 0.0])
        .await
        .expect("should add");

    faults.lock().expect("fault plan lock").corrupt_next = 1;
    let hits = store
        .search(&[1.0, 0.0], &MetadataFilter::document("Doc_00000001"), 5)
        .await;

    assert!(hits.is_some(), "search should succeed after recovery");
    {
        let faults = faults.lock().expect("fault plan lock");
        assert_eq!(faults.collection_resets, 1);
        assert_eq!(faults.store_resets, 0);
    }
    assert_eq!(store.state().await, StoreState::Healthy);
    assert!(store.is_healthy().await);
}

#[tokio::test]
async fn non_corruption_error_does_not_reset() {
    let (store, faults) = faulty_store();
    faults.lock().expect("fault plan lock").backend_error_next = 1;

    let hits = store
        .search(&[1.0, 0.0], &MetadataFilter::document("Doc_00000001"), 5)
        .await;

    assert!(hits.is_none());
    let faults = faults.lock().expect("fault plan lock");
    assert_eq!(faults.collection_resets, 0);
    assert_eq!(faults.store_resets, 0);
}

#[tokio::test]
async fn failed_collection_reset_falls_back_to_store_reset() {
    let (store, faults) = faulty_store();
    {
        let mut faults = faults.lock().expect("fault plan lock");
        faults.corrupt_next = 1;
        faults.fail_collection_reset = true;
    }

    let added = add(&store, metadata("Doc_00000001", 1, ElementType::Text), vec![1.0, 0.0]).await;

    assert_eq!(added, Ok(true));
    {
        let faults = faults.lock().expect("fault plan lock");
        assert_eq!(faults.collection_resets, 1);
        assert_eq!(faults.store_resets, 1);
    }
    assert_eq!(store.state().await, StoreState::Healthy);
    assert_eq!(store.stats().await.expect("stats").total_embeddings, 1);
}

#[tokio::test]
async fn failed_store_reset_is_unrecoverable() {
    let (store, faults) = faulty_store();
    {
        let mut faults = faults.lock().expect("fault plan lock");
        faults.corrupt_next = 1;
        faults.fail_collection_reset = true;
        faults.fail_store_reset = true;
    }

    let added = add(&store, metadata("Doc_00000001", 1, ElementType::Text), vec![1.0, 0.0]).await;

    assert!(matches!(added, Err(StoreError::Unrecoverable(_))));
    assert_eq!(store.state().await, StoreState::StoreCorrupt);
}

#[tokio::test]
async fn retry_is_attempted_only_once() {
    let (store, faults) = faulty_store();
    faults.lock().expect("fault plan lock").corrupt_next = 2;

    let hits = store
        .search(&[1.0, 0.0], &MetadataFilter::document("Doc_00000001"), 5)
        .await;

    assert!(hits.is_none());
    let faults = faults.lock().expect("fault plan lock");
    assert_eq!(faults.collection_resets, 1);
    assert_eq!(faults.store_resets, 0);
}

#[tokio::test]
async fn backend_error_after_successful_reset_leaves_store_healthy() {
    let (store, faults) = faulty_store();
    add(&store, metadata("Doc_00000001", 1, ElementType::Text), vec![1.0, 0.0])
        .await
        .expect("should add");
    {
        let mut faults = faults.lock().expect("fault plan lock");
        faults.corrupt_next = 1;
        faults.backend_error_next = 1;
    }

    let added = add(&store, metadata("Doc_00000001", 2, ElementType::Text), vec![0.0, 1.0]).await;

    assert_eq!(added, Ok(false));
    assert_eq!(faults.lock().expect("fault plan lock").collection_resets, 1);
    assert_eq!(store.state().await, StoreState::Healthy);
    assert_eq!(store.resets().await, 1);
    // page 1 went with the reset
    assert_eq!(store.stats().await.expect("stats").total_embeddings, 0);
}

#[tokio::test]
async fn resets_count_recoveries_and_forced_resets() {
    let (store, faults) = faulty_store();
    assert_eq!(store.resets().await, 0);

    faults.lock().expect("fault plan lock").corrupt_next = 1;
    let hits = store
        .search(&[1.0, 0.0], &MetadataFilter::document("Doc_00000001"), 5)
        .await;
    assert!(hits.is_some());
    assert_eq!(store.resets().await, 1);

    assert!(store.force_reset().await);
    assert_eq!(store.resets().await, 2);
}

#[tokio::test]
async fn backend_fault_on_add_returns_false() {
    let (store, faults) = faulty_store();
    faults.lock().expect("fault plan lock").backend_error_next = 1;

    let added = add(&store, metadata("Doc_00000001", 1, ElementType::Text), vec![1.0, 0.0]).await;
    assert_eq!(added, Ok(false));
}

#[tokio::test]
async fn mismatched_element_id_is_not_stored() {
    let (store, _faults) = faulty_store();

    let added = store
        .add(
            "other_element",
            "content",
            vec![1.0, 0.0],
            metadata("Doc_00000001", 1, ElementType::Text),
        )
        .await;

    assert_eq!(added, Ok(false));
    assert_eq!(store.stats().await.expect("stats").total_embeddings, 0);
}

#[tokio::test]
async fn search_is_scoped_by_filter() {
    let (store, _faults) = faulty_store();
    add(&store, metadata("Doc_00000001", 1, ElementType::Text), vec![1.0, 0.0])
        .await
        .expect("should add");
    add(&store, metadata("Doc_00000002", 1, ElementType::Text), vec![1.0, 0.0])
        .await
        .expect("should add");

    let hits = store
        .search(&[1.0, 0.0], &MetadataFilter::document("Doc_00000002"), 5)
        .await
        .expect("search should succeed");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata.document_id, "Doc_00000002");

    let empty = store
        .search(&[1.0, 0.0], &MetadataFilter::document("Doc_00000003"), 5)
        .await;
    assert_eq!(empty, Some(Vec::new()));
}

#[tokio::test]
async fn invalid_filters_are_rejected() {
    let (store, _faults) = faulty_store();

    assert!(!store.delete_by_metadata(&MetadataFilter::default()).await);
    assert!(
        store
            .search(&[1.0], &MetadataFilter::default(), 5)
            .await
            .is_none()
    );
}

#[tokio::test]
async fn delete_by_metadata_is_idempotent() {
    let (store, _faults) = faulty_store();
    for page in 1..=2 {
        add(&store, metadata("Doc_00000001", page, ElementType::Text), vec![1.0, 0.0])
            .await
            .expect("should add");
    }

    let filter = MetadataFilter::document("Doc_00000001");
    assert!(store.delete_by_metadata(&filter).await);
    assert!(store.delete_by_metadata(&filter).await);
    assert_eq!(store.stats().await.expect("stats").total_embeddings, 0);
}

#[tokio::test]
async fn document_stats_group_by_document() {
    let (store, _faults) = faulty_store();
    add(&store, metadata("Doc_00000001", 1, ElementType::Text), vec![1.0, 0.0])
        .await
        .expect("should add");
    add(&store, metadata("Doc_00000001", 1, ElementType::Flowchart), vec![0.0, 1.0])
        .await
        .expect("should add");
    add(&store, metadata("Doc_00000001", 2, ElementType::Text), vec![1.0, 1.0])
        .await
        .expect("should add");
    add(&store, metadata("Doc_00000002", 1, ElementType::Text), vec![1.0, 0.0])
        .await
        .expect("should add");

    let stats = store.document_stats().await.expect("document stats");
    assert_eq!(
        stats,
        vec![
            DocumentVectorStats {
                document_id: "Doc_00000001".to_string(),
                embeddings: 3,
                pages: 2,
            },
            DocumentVectorStats {
                document_id: "Doc_00000002".to_string(),
                embeddings: 1,
                pages: 1,
            },
        ]
    );
}

#[tokio::test]
async fn force_reset_clears_collection() {
    let (store, faults) = faulty_store();
    add(&store, metadata("Doc_00000001", 1, ElementType::Text), vec![1.0, 0.0])
        .await
        .expect("should add");

    assert!(store.force_reset().await);
    assert_eq!(store.stats().await.expect("stats").total_embeddings, 0);
    assert_eq!(faults.lock().expect("fault plan lock").collection_resets, 1);
}

#[tokio::test]
async fn is_healthy_does_not_run_recovery() {
    let (store, faults) = faulty_store();
    faults.lock().expect("fault plan lock").corrupt_next = 1;

    assert!(!store.is_healthy().await);
    assert_eq!(faults.lock().expect("fault plan lock").collection_resets, 0);
    assert!(store.is_healthy().await);
}

#[tokio::test]
async fn lance_round_trip_returns_own_vector_first() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::with_base_dir(temp_dir.path());
    let store = VectorStore::open(&config).await.expect("should open store");

    let vector = vec![0.3, 0.1, 0.7, 0.2];
    let metadata = metadata("Manual_0A1B2C3D", 3, ElementType::Flowchart);
    assert_eq!(
        store
            .add(&metadata.element_id, "Approval flow", vector.clone(), metadata.clone())
            .await,
        Ok(true)
    );

    let hits = store
        .search(&vector, &MetadataFilter::document("Manual_0A1B2C3D"), 5)
        .await
        .expect("search should succeed");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata, metadata);
    assert_eq!(hits[0].plain_text, "Approval flow");
    assert!(hits[0].distance.abs() < 1e-4);
    assert_ne!(hits[0].store_id, metadata.element_id);
}

#[tokio::test]
async fn lance_delete_of_unknown_document_succeeds() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::with_base_dir(temp_dir.path());
    let store = VectorStore::open(&config).await.expect("should open store");

    assert!(
        store
            .delete_by_metadata(&MetadataFilter::document("Missing_00000000"))
            .await
    );
    assert!(store.is_healthy().await);
    assert_eq!(
        store.stats().await.expect("stats"),
        StoreStats {
            total_embeddings: 0,
            collection_name: "page_elements".to_string(),
        }
    );
}
