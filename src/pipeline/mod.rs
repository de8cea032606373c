// Pipeline module
// Orchestrates ingestion, question answering and deletion over both stores


use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::Database;
use crate::database::lancedb::{
    DocumentVectorStats, ElementMetadata, MetadataFilter, StoreError, StoreState, StoreStats,
    VectorStore,
};
use crate::database::sqlite::models::{
    Document, DocumentStatistics, NewDocument, NewDocumentPage, NewPageElement, NewQaRecord,
    QaRecord,
};
use crate::database::sqlite::queries::{ElementQueries, PageQueries};
use crate::embeddings::{Embedder, OllamaClient, TaskMode};
use crate::extraction::Element;
use crate::generation::{OllamaGenerator, PageAnalyzer, TextGenerator};
use crate::retrieval::{Evidence, Retriever};
use crate::synthesis::{AnswerOutcome, AnswerSynthesizer, SynthesizedAnswer};
use crate::{QaError, Result};

/// One rendered page image to ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page_number: u32,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    /// Original file name; the document id is derived from it
    pub filename: String,
    pub source_path: Option<PathBuf>,
    pub pages: Vec<PageImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub pages_processed: usize,
    pub elements_indexed: usize,
    pub elements_skipped: usize,
    /// The vector store was reset mid-ingestion, so pages before the reset are not searchable
    pub vectors_reset: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRequest {
    pub document_id: String,
    pub question: String,
    /// Search depth; the configured default when absent
    pub top_k: Option<usize>,
    pub record_history: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub outcome: AnswerOutcome,
    pub evidence: Vec<Evidence>,
    pub average_score: Option<f64>,
    pub response_time_ms: u64,
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub database: bool,
    pub vector_store: bool,
    pub vector_state: StoreState,
}

#[derive(Debug, Clone, Copy, Default)]
struct PageCounts {
    indexed: usize,
    skipped: usize,
}

/// `{clean filename}_{8 upper-case hex}`, with `document` when nothing usable remains
#[inline]
pub fn generate_document_id(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let mut name = cleaned.split_whitespace().join("_");
    if name.is_empty() {
        name = "document".to_string();
    }

    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>()
        .to_uppercase();

    format!("{}_{}", name, suffix)
}

#[inline]
pub fn page_image_path(documents_dir: &Path, document_id: &str, page_number: u32) -> PathBuf {
    documents_dir
        .join(document_id)
        .join(format!("{}_page_{}.png", document_id, page_number))
}

/// Mean of the evidence scores, rounded like the scores themselves
#[inline]
pub fn average_score(evidence: &[Evidence]) -> Option<f64> {
    if evidence.is_empty() {
        return None;
    }
    let total: f64 = evidence.iter().map(|item| item.similarity_score).sum();
    Some(crate::retrieval::round_score(total / evidence.len() as f64))
}

fn progress_bar(len: u64) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{bar:30} [{pos}/{len}] {msg}") {
        bar.set_style(style);
    }
    bar
}

pub struct QaPipeline {
    config: Config,
    database: Database,
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    analyzer: Arc<dyn PageAnalyzer>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
}

impl QaPipeline {
    /// Open both stores under the configured base directory and connect the Ollama clients
    #[inline]
    pub async fn open(config: Config) -> Result<Self> {
        let database = Database::new(config.database_path())
            .await
            .map_err(|e| QaError::Database(format!("{:#}", e)))?;
        let store = Arc::new(VectorStore::open(&config).await?);

        let embedder = OllamaClient::new(&config.ollama)
            .map_err(|e| QaError::Config(format!("{:#}", e)))?;
        let generator = Arc::new(
            OllamaGenerator::new(&config.ollama, &config.generation)
                .map_err(|e| QaError::Config(format!("{:#}", e)))?,
        );

        Ok(Self::from_parts(
            config,
            database,
            store,
            Arc::new(embedder),
            generator.clone(),
            generator,
        ))
    }

    #[inline]
    pub fn from_parts(
        config: Config,
        database: Database,
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        analyzer: Arc<dyn PageAnalyzer>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let retriever = Retriever::new(Arc::clone(&store), config.ranking.clone());
        Self {
            config,
            database,
            store,
            embedder,
            analyzer,
            retriever,
            synthesizer: AnswerSynthesizer::new(generator),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Analyse, embed and index every page of a new document.
    ///
    /// Pages are committed one at a time. A page that cannot be completed is
    /// rolled back with its vectors and the document is marked failed.
    #[inline]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport> {
        let document_id = generate_document_id(&request.filename);

        let mut pages = request.pages;
        pages.sort_by_key(|page| page.page_number);
        if pages.is_empty() {
            return Err(QaError::Ingestion {
                document_id,
                page_number: 0,
                reason: "no page images supplied".to_string(),
            });
        }
        if let Some(page) = pages
            .iter()
            .tuple_windows()
            .find_map(|(a, b)| (a.page_number == b.page_number).then_some(b))
            .or_else(|| pages.iter().find(|page| page.page_number == 0))
        {
            return Err(QaError::Ingestion {
                document_id,
                page_number: page.page_number,
                reason: "page numbers must be unique and start at 1".to_string(),
            });
        }

        self.database
            .create_document(NewDocument {
                document_id: document_id.clone(),
                filename: request.filename.clone(),
                filepath: request
                    .source_path
                    .as_ref()
                    .map(|path| path.to_string_lossy().into_owned()),
            })
            .await
            .map_err(|e| QaError::Database(format!("{:#}", e)))?;

        info!(
            "Ingesting {} as {} ({} pages)",
            request.filename,
            document_id,
            pages.len()
        );

        let documents_dir = self.config.documents_dir();
        let bar = progress_bar(pages.len() as u64);
        let resets_before = self.store.resets().await;
        let mut report = IngestReport {
            document_id: document_id.clone(),
            pages_processed: 0,
            elements_indexed: 0,
            elements_skipped: 0,
            vectors_reset: false,
        };

        for page in &pages {
            bar.set_message(format!("page {}", page.page_number));

            let stored_path = page_image_path(&documents_dir, &document_id, page.page_number);
            if let Err(e) = copy_page_image(&page.path, &stored_path) {
                return Err(self
                    .fail_ingestion(&document_id, page.page_number, format!("{:#}", e))
                    .await);
            }

            match self.ingest_page(&document_id, page.page_number, &stored_path).await {
                Ok(counts) => {
                    report.pages_processed += 1;
                    report.elements_indexed += counts.indexed;
                    report.elements_skipped += counts.skipped;
                }
                Err(reason) => {
                    bar.abandon();
                    return Err(self.fail_ingestion(&document_id, page.page_number, reason).await);
                }
            }
            bar.inc(1);
        }

        bar.finish_and_clear();

        report.vectors_reset = self.store.resets().await != resets_before;
        if report.vectors_reset {
            warn!(
                "Vector store was reset while ingesting {}; embeddings written before the reset are gone",
                document_id
            );
        }

        self.database
            .mark_document_completed(&document_id, pages.len() as i64)
            .await
            .map_err(|e| QaError::Database(format!("{:#}", e)))?;

        info!(
            "Ingested {}: {} pages, {} elements indexed, {} skipped",
            document_id, report.pages_processed, report.elements_indexed, report.elements_skipped
        );
        Ok(report)
    }

    async fn ingest_page(
        &self,
        document_id: &str,
        page_number: u32,
        image_path: &Path,
    ) -> std::result::Result<PageCounts, String> {
        let analysis = self
            .analyzer
            .analyze_page(image_path)
            .ok_or_else(|| "page analysis unavailable".to_string())?;
        let page_label = Some(analysis.page_number.clone()).filter(|label| !label.is_empty());
        let elements = analysis.into_elements(document_id, page_number);
        debug!(
            "Page {} of {} produced {} elements",
            page_number,
            document_id,
            elements.len()
        );

        let mut tx = self
            .database
            .begin()
            .await
            .map_err(|e| format!("{:#}", e))?;

        match self
            .write_page(&mut tx, document_id, page_number, page_label, elements)
            .await
        {
            Ok(counts) => {
                tx.commit()
                    .await
                    .map_err(|e| format!("Failed to commit page: {}", e))?;
                Ok(counts)
            }
            Err(reason) => {
                if let Err(e) = tx.rollback().await {
                    error!("Failed to roll back page {}: {}", page_number, e);
                }
                Err(reason)
            }
        }
    }

    async fn write_page(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        document_id: &str,
        page_number: u32,
        page_label: Option<String>,
        elements: Vec<Element>,
    ) -> std::result::Result<PageCounts, String> {
        let page_id = PageQueries::create(
            tx,
            &NewDocumentPage {
                document_id: document_id.to_string(),
                page_number,
                page_label,
            },
        )
        .await
        .map_err(|e| format!("{:#}", e))?;

        let mut counts = PageCounts::default();
        for element in elements {
            if element.plain_text.trim().is_empty() {
                warn!("Skipping element {} with empty text", element.element_id);
                counts.skipped += 1;
                continue;
            }

            let Some(vector) = self.embedder.embed(&element.plain_text, TaskMode::Document) else {
                warn!("Skipping element {}: embedding unavailable", element.element_id);
                counts.skipped += 1;
                continue;
            };

            let metadata = ElementMetadata {
                element_id: element.element_id.clone(),
                document_id: element.document_id.clone(),
                page_number: element.page_number,
                element_type: element.element_type,
            };

            match self
                .store
                .add(&element.element_id, &element.plain_text, vector, metadata)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Skipping element {}: not indexed", element.element_id);
                    counts.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.to_string()),
            }

            ElementQueries::create(
                tx,
                &NewPageElement {
                    element_id: element.element_id.clone(),
                    page_id,
                    element_type: element.element_type,
                    content_json: element.content.to_string(),
                    plain_text: element.plain_text.clone(),
                    vector_id: Some(element.element_id.clone()),
                },
            )
            .await
            .map_err(|e| format!("{:#}", e))?;

            counts.indexed += 1;
        }

        Ok(counts)
    }

    /// Remove the failed page's vectors and mark the document failed
    async fn fail_ingestion(&self, document_id: &str, page_number: u32, reason: String) -> QaError {
        error!(
            "Ingestion of {} failed on page {}: {}",
            document_id, page_number, reason
        );

        let filter = MetadataFilter::document(document_id).and_page(page_number);
        if !self.store.delete_by_metadata(&filter).await {
            error!(
                "Failed to remove vectors of page {} of {}",
                page_number, document_id
            );
        }

        if let Err(e) = self
            .database
            .mark_document_failed(document_id, &format!("page {}: {}", page_number, reason))
            .await
        {
            error!("Failed to mark {} as failed: {:#}", document_id, e);
        }

        QaError::Ingestion {
            document_id: document_id.to_string(),
            page_number,
            reason,
        }
    }

    /// Answer a question from the evidence of one document
    #[inline]
    pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerResponse> {
        let started = Instant::now();

        let question = request.question.trim();
        if question.is_empty() {
            return Err(QaError::Config("question must not be empty".to_string()));
        }

        let document = self
            .database
            .get_document(&request.document_id)
            .await
            .map_err(|e| QaError::Database(format!("{:#}", e)))?
            .ok_or_else(|| QaError::NotFound(format!("document {}", request.document_id)))?;
        if !document.is_completed() {
            warn!(
                "Answering from document {} with status {}",
                document.document_id, document.status
            );
        }

        let Some(query_embedding) = self.embedder.embed(question, TaskMode::Query) else {
            warn!(
                "Query embedding unavailable for {}, answering degraded",
                request.document_id
            );
            let degraded = SynthesizedAnswer::embedding_unavailable();
            return Ok(AnswerResponse {
                answer: degraded.text,
                outcome: degraded.outcome,
                evidence: Vec::new(),
                average_score: None,
                response_time_ms: u64::try_from(started.elapsed().as_millis())
                    .unwrap_or(u64::MAX),
                history_id: None,
            });
        };

        let top_k = request.top_k.unwrap_or(self.config.ranking.default_top_k);
        let evidence = self
            .retriever
            .search_similar_content(&request.document_id, &query_embedding, top_k)
            .await;

        let synthesized = self.synthesizer.synthesize(question, &evidence);
        let average_score = average_score(&evidence);
        let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let history_id = if request.record_history {
            let page_references = evidence.iter().map(|item| item.page_number).unique().collect();
            let record = self
                .database
                .record_qa(NewQaRecord {
                    document_id: request.document_id.clone(),
                    question: question.to_string(),
                    answer: synthesized.text.clone(),
                    response_time_ms: i64::try_from(response_time_ms).unwrap_or(i64::MAX),
                    similarity_score: average_score,
                    page_references,
                })
                .await
                .map_err(|e| QaError::Database(format!("{:#}", e)))?;
            Some(record.id)
        } else {
            None
        };

        info!(
            "Answered question on {} with {} evidence items in {} ms",
            request.document_id,
            evidence.len(),
            response_time_ms
        );

        Ok(AnswerResponse {
            answer: synthesized.text,
            outcome: synthesized.outcome,
            evidence,
            average_score,
            response_time_ms,
            history_id,
        })
    }

    /// Delete a document's vectors, rows and page images
    ///
    /// Returns whether a document row existed. A document with no vectors
    /// deletes cleanly.
    #[inline]
    pub async fn delete(&self, document_id: &str) -> Result<bool> {
        if !self
            .store
            .delete_by_metadata(&MetadataFilter::document(document_id))
            .await
        {
            return Err(QaError::VectorStore(StoreError::Backend(format!(
                "failed to delete vectors of {}",
                document_id
            ))));
        }

        let existed = self
            .database
            .delete_document(document_id)
            .await
            .map_err(|e| QaError::Database(format!("{:#}", e)))?;

        let image_dir = self.config.documents_dir().join(document_id);
        if image_dir.exists() {
            std::fs::remove_dir_all(&image_dir)?;
        }

        if existed {
            info!("Deleted document {}", document_id);
        } else {
            warn!("Document {} not found", document_id);
        }
        Ok(existed)
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        self.database
            .list_documents()
            .await
            .map_err(|e| QaError::Database(format!("{:#}", e)))
    }

    #[inline]
    pub async fn document_info(&self, document_id: &str) -> Result<DocumentStatistics> {
        self.database
            .document_statistics(document_id)
            .await
            .map_err(|e| QaError::Database(format!("{:#}", e)))?
            .ok_or_else(|| QaError::NotFound(format!("document {}", document_id)))
    }

    #[inline]
    pub async fn history(&self, document_id: &str, limit: i64) -> Result<Vec<QaRecord>> {
        self.database
            .qa_history(document_id, limit)
            .await
            .map_err(|e| QaError::Database(format!("{:#}", e)))
    }

    #[inline]
    pub async fn delete_history_entry(&self, id: &str) -> Result<bool> {
        self.database
            .delete_qa_entry(id)
            .await
            .map_err(|e| QaError::Database(format!("{:#}", e)))
    }

    #[inline]
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            database: self.database.health_check().await,
            vector_store: self.store.is_healthy().await,
            vector_state: self.store.state().await,
        }
    }

    #[inline]
    pub async fn vector_statistics(&self) -> Result<(StoreStats, Vec<DocumentVectorStats>)> {
        let stats = self.store.stats().await?;
        let per_document = self.store.document_stats().await?;
        Ok((stats, per_document))
    }

    /// Drop every stored embedding; documents must be re-ingested afterwards
    #[inline]
    pub async fn reset_vectors(&self) -> bool {
        self.store.force_reset().await
    }
}

fn copy_page_image(source: &Path, destination: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::copy(source, destination).with_context(|| {
        format!(
            "Failed to copy page image {} to {}",
            source.display(),
            destination.display()
        )
    })?;
    Ok(())
}
