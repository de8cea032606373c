
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::corruption::lance_error;
use super::{ElementMetadata, EmbeddingRecord, MetadataFilter, RawHit, StoreError};

/// Operations the recovery protocol needs from a vector index.
///
/// Implementations report unreadable on-disk state as [`StoreError::Corrupt`]
/// and never retry on their own; retries and resets are driven by
/// [`super::VectorStore`].
#[async_trait]
pub trait IndexBackend: Send + Sync {
    fn collection_name(&self) -> &str;

    async fn insert(&mut self, record: &EmbeddingRecord) -> Result<(), StoreError>;

    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<RawHit>, StoreError>;

    /// Metadata of every stored record matching `filter` (all records for `None`)
    async fn scan(&self, filter: Option<&MetadataFilter>)
    -> Result<Vec<ElementMetadata>, StoreError>;

    async fn delete(&mut self, filter: &MetadataFilter) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Drop and recreate the collection in place
    async fn reset_collection(&mut self) -> Result<(), StoreError>;

    /// Move the whole on-disk store aside and start from an empty one
    async fn reset_store(&mut self) -> Result<(), StoreError>;
}

/// LanceDB-backed index holding one table of element embeddings
pub struct LanceBackend {
    connection: Connection,
    db_path: PathBuf,
    table_name: String,
    vector_dimension: Option<usize>,
}

impl LanceBackend {
    /// Open (or create) the store at `db_path`
    ///
    /// A connection failure that looks like corruption moves the directory
    /// aside once and reconnects to a fresh store.
    #[inline]
    pub async fn open(db_path: &Path, table_name: &str) -> Result<Self, StoreError> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            StoreError::Backend(format!("Failed to create vector database directory: {}", e))
        })?;

        let connection = match Self::connect(db_path).await {
            Ok(conn) => conn,
            Err(StoreError::Corrupt(message)) => {
                warn!("Database corruption detected on connect: {}", message);
                Self::move_aside(db_path)?;
                Self::connect(db_path).await.map_err(|e| {
                    StoreError::Unrecoverable(format!(
                        "Failed to connect to LanceDB after recovery: {}",
                        e
                    ))
                })?
            }
            Err(e) => return Err(e),
        };

        let mut backend = Self {
            connection,
            db_path: db_path.to_path_buf(),
            table_name: table_name.to_string(),
            vector_dimension: None,
        };

        backend.initialize_table().await?;

        info!("Vector store initialized at {:?}", db_path);
        Ok(backend)
    }

    #[inline]
    pub fn vector_dimension(&self) -> Option<usize> {
        self.vector_dimension
    }

    async fn connect(db_path: &Path) -> Result<Connection, StoreError> {
        let uri = db_path.to_string_lossy();
        lancedb::connect(&uri)
            .execute()
            .await
            .map_err(lance_error("Failed to connect to LanceDB"))
    }

    /// Pick up the dimension of an existing table; drop it if its schema is unreadable
    async fn initialize_table(&mut self) -> Result<(), StoreError> {
        if !self.table_exists().await? {
            debug!(
                "Table {} does not exist yet, it will be created on first insert",
                self.table_name
            );
            return Ok(());
        }

        match self.detect_existing_vector_dimension().await {
            Ok(dim) => {
                info!("Detected existing vector dimension: {}", dim);
                self.vector_dimension = Some(dim);
                Ok(())
            }
            Err(e) if e.is_corruption() => {
                warn!("Table corruption detected during initialization: {}", e);
                self.drop_table_if_exists().await
            }
            Err(e) => Err(e),
        }
    }

    async fn table_exists(&self) -> Result<bool, StoreError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(lance_error("Failed to list tables"))?;
        Ok(table_names.contains(&self.table_name))
    }

    async fn open_table(&self) -> Result<Option<Table>, StoreError> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map(Some)
            .map_err(lance_error("Failed to open table"))
    }

    async fn detect_existing_vector_dimension(&self) -> Result<usize, StoreError> {
        let Some(table) = self.open_table().await? else {
            return Err(StoreError::Backend("Table disappeared".to_string()));
        };

        let schema = table
            .schema()
            .await
            .map_err(lance_error("Failed to get table schema"))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(StoreError::Corrupt(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new("element_id", DataType::Utf8, false),
            Field::new("document_id", DataType::Utf8, false),
            Field::new("page_number", DataType::UInt32, false),
            Field::new("element_type", DataType::Utf8, false),
            Field::new("plain_text", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    async fn create_table(&self, vector_dim: usize) -> Result<(), StoreError> {
        self.connection
            .create_empty_table(&self.table_name, Self::create_schema(vector_dim))
            .execute()
            .await
            .map_err(lance_error("Failed to create table"))?;

        info!(
            "Created table {} with {} dimensions",
            self.table_name, vector_dim
        );
        Ok(())
    }

    async fn drop_table_if_exists(&self) -> Result<(), StoreError> {
        if self.table_exists().await? {
            info!("Dropping table {}", self.table_name);
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(lance_error("Failed to drop table"))?;
        }
        Ok(())
    }

    fn create_record_batch(
        record: &EmbeddingRecord,
        vector_dim: usize,
    ) -> Result<RecordBatch, StoreError> {
        let values_array = Float32Array::from(record.vector.clone());
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
                .map_err(|e| {
                    StoreError::Rejected(format!("Failed to create vector array: {}", e))
                })?;

        let metadata = &record.metadata;
        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(vec![record.id.as_str()])),
            Arc::new(vector_array),
            Arc::new(StringArray::from(vec![metadata.element_id.as_str()])),
            Arc::new(StringArray::from(vec![metadata.document_id.as_str()])),
            Arc::new(UInt32Array::from(vec![metadata.page_number])),
            Arc::new(StringArray::from(vec![metadata.element_type.as_str()])),
            Arc::new(StringArray::from(vec![record.plain_text.as_str()])),
            Arc::new(StringArray::from(vec![record.created_at.as_str()])),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim), arrays)
            .map_err(|e| StoreError::Rejected(format!("Failed to create record batch: {}", e)))
    }

    async fn collect_hits(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<RawHit>, StoreError> {
        let mut hits = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(lance_error("Failed to read result stream"))?
        {
            hits.extend(parse_batch(&batch)?);
        }

        debug!("Parsed {} hits from stream", hits.len());
        Ok(hits)
    }

    /// Rename the store directory to a timestamped backup, removing it if the rename fails
    fn move_aside(db_path: &Path) -> Result<(), StoreError> {
        if !db_path.exists() {
            return Ok(());
        }

        let file_name = db_path
            .file_name()
            .map_or_else(|| "vectors".into(), |name| name.to_string_lossy());
        let backup_path = db_path.with_file_name(format!(
            "{}.corrupted_backup_{}",
            file_name,
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));

        match std::fs::rename(db_path, &backup_path) {
            Ok(()) => info!("Corrupted vector store backed up to {:?}", backup_path),
            Err(e) => {
                error!("Failed to back up corrupted vector store: {}", e);
                std::fs::remove_dir_all(db_path).map_err(|e| {
                    StoreError::Unrecoverable(format!(
                        "Failed to remove corrupted vector store: {}",
                        e
                    ))
                })?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl IndexBackend for LanceBackend {
    #[inline]
    fn collection_name(&self) -> &str {
        &self.table_name
    }

    async fn insert(&mut self, record: &EmbeddingRecord) -> Result<(), StoreError> {
        let vector_dim = record.vector.len();
        if vector_dim == 0 {
            return Err(StoreError::Rejected("Embedding vector is empty".to_string()));
        }

        match self.vector_dimension {
            Some(expected) if expected != vector_dim => {
                return Err(StoreError::Rejected(format!(
                    "Embedding has {} dimensions, collection expects {}",
                    vector_dim, expected
                )));
            }
            Some(_) => {}
            None => self.vector_dimension = Some(vector_dim),
        }

        let table = match self.open_table().await? {
            Some(table) => table,
            None => {
                self.create_table(vector_dim).await?;
                self.open_table()
                    .await?
                    .ok_or_else(|| StoreError::Backend("Created table is missing".to_string()))?
            }
        };

        let batch = Self::create_record_batch(record, vector_dim)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(lance_error("Failed to insert embedding"))?;

        debug!(
            "Stored embedding {} for element {}",
            record.id, record.metadata.element_id
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<RawHit>, StoreError> {
        let predicate = filter.to_predicate()?;

        if let Some(expected) = self.vector_dimension {
            if expected != vector.len() {
                return Err(StoreError::Rejected(format!(
                    "Query has {} dimensions, collection expects {}",
                    vector.len(),
                    expected
                )));
            }
        }

        let Some(table) = self.open_table().await? else {
            return Ok(Vec::new());
        };

        debug!("Vector search limit={} predicate={}", limit, predicate);

        let results = table
            .vector_search(vector)
            .map_err(lance_error("Failed to create vector search"))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .only_if(predicate)
            .execute()
            .await
            .map_err(lance_error("Failed to execute search"))?;

        Self::collect_hits(results).await
    }

    async fn scan(
        &self,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ElementMetadata>, StoreError> {
        let Some(table) = self.open_table().await? else {
            return Ok(Vec::new());
        };

        let predicate = filter.map(MetadataFilter::to_predicate).transpose()?;
        let total = table
            .count_rows(predicate.clone())
            .await
            .map_err(lance_error("Failed to count rows"))?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut query = table.query().limit(total);
        if let Some(predicate) = predicate {
            query = query.only_if(predicate);
        }

        let results = query
            .execute()
            .await
            .map_err(lance_error("Failed to scan table"))?;

        Ok(Self::collect_hits(results)
            .await?
            .into_iter()
            .map(|hit| hit.metadata)
            .collect())
    }

    async fn delete(&mut self, filter: &MetadataFilter) -> Result<(), StoreError> {
        let predicate = filter.to_predicate()?;

        let Some(table) = self.open_table().await? else {
            debug!("Nothing to delete, table {} is absent", self.table_name);
            return Ok(());
        };

        table
            .delete(&predicate)
            .await
            .map_err(lance_error("Failed to delete embeddings"))?;

        debug!("Deleted embeddings matching {}", predicate);
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        table
            .count_rows(None)
            .await
            .map_err(lance_error("Failed to count rows"))
    }

    async fn reset_collection(&mut self) -> Result<(), StoreError> {
        warn!("Resetting collection {}", self.table_name);

        self.drop_table_if_exists().await?;
        if let Some(dim) = self.vector_dimension {
            self.create_table(dim).await?;
        }

        info!("Collection {} reset", self.table_name);
        Ok(())
    }

    async fn reset_store(&mut self) -> Result<(), StoreError> {
        warn!("Resetting entire vector store at {:?}", self.db_path);

        Self::move_aside(&self.db_path)?;
        std::fs::create_dir_all(&self.db_path).map_err(|e| {
            StoreError::Unrecoverable(format!("Failed to recreate vector store directory: {}", e))
        })?;

        self.connection = Self::connect(&self.db_path).await?;
        if let Some(dim) = self.vector_dimension {
            self.create_table(dim).await?;
        }

        info!("Vector store recreated at {:?}", self.db_path);
        Ok(())
    }
}

/// Parse one record batch of search or scan results
fn parse_batch(batch: &RecordBatch) -> Result<Vec<RawHit>, StoreError> {
    let ids = string_column(batch, "id")?;
    let element_ids = string_column(batch, "element_id")?;
    let document_ids = string_column(batch, "document_id")?;
    let element_types = string_column(batch, "element_type")?;
    let plain_texts = string_column(batch, "plain_text")?;

    let page_numbers = batch
        .column_by_name("page_number")
        .ok_or_else(|| StoreError::Corrupt("Missing page_number column".to_string()))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| StoreError::Corrupt("Invalid page_number column type".to_string()))?;

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut hits = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let element_type = match element_types.value(row).parse() {
            Ok(element_type) => element_type,
            Err(e) => {
                warn!("Skipping stored record {}: {}", ids.value(row), e);
                continue;
            }
        };

        let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        hits.push(RawHit {
            store_id: ids.value(row).to_string(),
            metadata: ElementMetadata {
                element_id: element_ids.value(row).to_string(),
                document_id: document_ids.value(row).to_string(),
                page_number: page_numbers.value(row),
                element_type,
            },
            plain_text: plain_texts.value(row).to_string(),
            distance,
        });
    }

    Ok(hits)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StoreError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| StoreError::Corrupt(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| StoreError::Corrupt(format!("Invalid {} column type", name)))
}
