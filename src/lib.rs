use thiserror::Error;

pub type Result<T> = std::result::Result<T, QaError>;

#[derive(Error, Debug)]
pub enum QaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] database::lancedb::StoreError),

    #[error("Ingestion of document {document_id} failed on page {page_number}: {reason}")]
    Ingestion {
        document_id: String,
        page_number: u32,
        reason: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod extraction;
pub mod generation;
pub mod pipeline;
pub mod retrieval;
pub mod synthesis;
