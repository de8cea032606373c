use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::database::sqlite::models::{
    Document, DocumentStatistics, NewDocument, NewQaRecord, PageElement, QaRecord,
};
use crate::database::sqlite::queries::{
    DocumentQueries, ElementQueries, PageQueries, QaHistoryQueries,
};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// Relational store for documents, pages, elements and QA history
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Start a transaction; the per-page ingestion writes go through it
    #[inline]
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin transaction")
    }

    #[inline]
    pub async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Database health check failed: {}", e);
                false
            }
        }
    }

    // Document operations
    #[inline]
    pub async fn create_document(&self, document: NewDocument) -> Result<Document> {
        DocumentQueries::create(&self.pool, document).await
    }

    #[inline]
    pub async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        DocumentQueries::get_by_id(&self.pool, document_id).await
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        DocumentQueries::list_all(&self.pool).await
    }

    #[inline]
    pub async fn mark_document_completed(&self, document_id: &str, page_count: i64) -> Result<()> {
        DocumentQueries::mark_completed(&self.pool, document_id, page_count).await
    }

    #[inline]
    pub async fn mark_document_failed(&self, document_id: &str, error_message: &str) -> Result<()> {
        DocumentQueries::mark_failed(&self.pool, document_id, error_message).await
    }

    #[inline]
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        DocumentQueries::delete(&self.pool, document_id).await
    }

    #[inline]
    pub async fn document_statistics(&self, document_id: &str) -> Result<Option<DocumentStatistics>> {
        DocumentQueries::get_statistics(&self.pool, document_id).await
    }

    // Page and element operations
    #[inline]
    pub async fn page_count(&self, document_id: &str) -> Result<usize> {
        Ok(PageQueries::list_by_document(&self.pool, document_id)
            .await?
            .len())
    }

    #[inline]
    pub async fn list_elements(&self, document_id: &str) -> Result<Vec<PageElement>> {
        ElementQueries::list_by_document(&self.pool, document_id).await
    }

    // QA history operations
    #[inline]
    pub async fn record_qa(&self, record: NewQaRecord) -> Result<QaRecord> {
        QaHistoryQueries::create(&self.pool, record).await
    }

    #[inline]
    pub async fn qa_history(&self, document_id: &str, limit: i64) -> Result<Vec<QaRecord>> {
        QaHistoryQueries::list_by_document(&self.pool, document_id, limit).await
    }

    #[inline]
    pub async fn delete_qa_entry(&self, id: &str) -> Result<bool> {
        QaHistoryQueries::delete(&self.pool, id).await
    }
}
