
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

use crate::extraction::ElementType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub document_id: String,
    pub filename: String,
    pub filepath: Option<String>,
    pub status: DocumentStatus,
    pub page_count: i64,
    pub error_message: Option<String>,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            DocumentStatus::Processing => write!(f, "Processing"),
            DocumentStatus::Completed => write!(f, "Completed"),
            DocumentStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub document_id: String,
    pub filename: String,
    pub filepath: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentPage {
    pub id: i64,
    pub document_id: String,
    pub page_number: i64,
    pub page_label: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocumentPage {
    pub document_id: String,
    pub page_number: u32,
    /// Label printed on the page, as reported by page analysis
    pub page_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PageElement {
    pub id: i64,
    pub element_id: String,
    pub page_id: i64,
    pub element_type: String,
    pub content_json: String,
    pub plain_text: String,
    pub vector_id: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPageElement {
    pub element_id: String,
    pub page_id: i64,
    pub element_type: ElementType,
    pub content_json: String,
    pub plain_text: String,
    pub vector_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QaRecord {
    pub id: String,
    pub document_id: String,
    pub question: String,
    pub answer: String,
    pub response_time_ms: i64,
    pub similarity_score: Option<f64>,
    /// JSON array of page numbers cited by the answer
    pub page_references: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQaRecord {
    pub document_id: String,
    pub question: String,
    pub answer: String,
    pub response_time_ms: i64,
    pub similarity_score: Option<f64>,
    pub page_references: Vec<u32>,
}

/// Document row with counts of its dependent rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatistics {
    pub document: Document,
    pub stored_pages: i64,
    pub total_elements: i64,
    pub questions_answered: i64,
}

impl Document {
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == DocumentStatus::Completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.status == DocumentStatus::Failed
    }
}

impl QaRecord {
    /// Parsed page references; malformed JSON yields an empty list
    #[inline]
    pub fn pages(&self) -> Vec<u32> {
        serde_json::from_str(&self.page_references).unwrap_or_default()
    }
}
