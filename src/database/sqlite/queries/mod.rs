#[cfg(test)]
mod tests;

use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

const DOCUMENT_COLUMNS: &str =
    "document_id, filename, filepath, status, page_count, error_message, uploaded_at";

const ELEMENT_COLUMNS: &str =
    "id, element_id, page_id, element_type, content_json, plain_text, vector_id, created_at";

const QA_COLUMNS: &str = "id, document_id, question, answer, response_time_ms, similarity_score, page_references, created_at";

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_document: NewDocument) -> Result<Document> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO documents (document_id, filename, filepath, status, uploaded_at) VALUES (?, ?, ?, 'processing', ?)",
        )
        .bind(&new_document.document_id)
        .bind(&new_document.filename)
        .bind(&new_document.filepath)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create document")?;

        Self::get_by_id(pool, &new_document.document_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, document_id: &str) -> Result<Option<Document>> {
        let query = format!("SELECT {} FROM documents WHERE document_id = ?", DOCUMENT_COLUMNS);
        let result = sqlx::query_as::<_, Document>(&query)
            .bind(document_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Document>> {
        let query = format!(
            "SELECT {} FROM documents ORDER BY uploaded_at DESC, document_id",
            DOCUMENT_COLUMNS
        );
        let documents = sqlx::query_as::<_, Document>(&query)
            .fetch_all(pool)
            .await
            .context("Failed to list documents")?;

        Ok(documents)
    }

    #[inline]
    pub async fn mark_completed(pool: &SqlitePool, document_id: &str, page_count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET status = 'completed', page_count = ?, error_message = NULL WHERE document_id = ?",
        )
        .bind(page_count)
        .bind(document_id)
        .execute(pool)
        .await
        .context("Failed to mark document completed")?;

        Ok(())
    }

    #[inline]
    pub async fn mark_failed(pool: &SqlitePool, document_id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET status = 'failed', error_message = ? WHERE document_id = ?",
        )
        .bind(error_message)
        .bind(document_id)
        .execute(pool)
        .await
        .context("Failed to mark document failed")?;

        Ok(())
    }

    /// Delete a document; pages, elements and QA history follow by cascade
    #[inline]
    pub async fn delete(pool: &SqlitePool, document_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE document_id = ?")
            .bind(document_id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn get_statistics(
        pool: &SqlitePool,
        document_id: &str,
    ) -> Result<Option<DocumentStatistics>> {
        let Some(document) = Self::get_by_id(pool, document_id).await? else {
            return Ok(None);
        };

        let stored_pages: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_pages WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(pool)
                .await
                .context("Failed to count pages")?;

        let total_elements = ElementQueries::count_by_document(pool, document_id).await?;

        let questions_answered: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM qa_history WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(pool)
                .await
                .context("Failed to count questions")?;

        Ok(Some(DocumentStatistics {
            document,
            stored_pages,
            total_elements,
            questions_answered,
        }))
    }
}

/// Page rows are written inside the per-page ingestion transaction
pub struct PageQueries;

impl PageQueries {
    #[inline]
    pub async fn create(conn: &mut SqliteConnection, page: &NewDocumentPage) -> Result<i64> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO document_pages (document_id, page_number, page_label, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&page.document_id)
        .bind(i64::from(page.page_number))
        .bind(&page.page_label)
        .bind(now)
        .execute(conn)
        .await
        .with_context(|| format!("Failed to create page {}", page.page_number))?
        .last_insert_rowid();

        debug!("Created page {} for {}", page.page_number, page.document_id);
        Ok(id)
    }

    #[inline]
    pub async fn list_by_document(pool: &SqlitePool, document_id: &str) -> Result<Vec<DocumentPage>> {
        let pages = sqlx::query_as::<_, DocumentPage>(
            "SELECT id, document_id, page_number, page_label, created_at FROM document_pages WHERE document_id = ? ORDER BY page_number",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .context("Failed to list pages")?;

        Ok(pages)
    }
}

pub struct ElementQueries;

impl ElementQueries {
    #[inline]
    pub async fn create(conn: &mut SqliteConnection, element: &NewPageElement) -> Result<i64> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO page_elements (element_id, page_id, element_type, content_json, plain_text, vector_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&element.element_id)
        .bind(element.page_id)
        .bind(element.element_type.as_str())
        .bind(&element.content_json)
        .bind(&element.plain_text)
        .bind(&element.vector_id)
        .bind(now)
        .execute(conn)
        .await
        .with_context(|| format!("Failed to create element {}", element.element_id))?
        .last_insert_rowid();

        Ok(id)
    }

    #[inline]
    pub async fn get_by_element_id(pool: &SqlitePool, element_id: &str) -> Result<Option<PageElement>> {
        let query = format!("SELECT {} FROM page_elements WHERE element_id = ?", ELEMENT_COLUMNS);
        let element = sqlx::query_as::<_, PageElement>(&query)
            .bind(element_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get element")?;

        Ok(element)
    }

    #[inline]
    pub async fn list_by_document(pool: &SqlitePool, document_id: &str) -> Result<Vec<PageElement>> {
        let query = format!(
            "SELECT {} FROM page_elements WHERE page_id IN (SELECT id FROM document_pages WHERE document_id = ?) ORDER BY page_id, id",
            ELEMENT_COLUMNS
        );
        let elements = sqlx::query_as::<_, PageElement>(&query)
            .bind(document_id)
            .fetch_all(pool)
            .await
            .context("Failed to list elements")?;

        Ok(elements)
    }

    #[inline]
    pub async fn count_by_document(pool: &SqlitePool, document_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM page_elements WHERE page_id IN (SELECT id FROM document_pages WHERE document_id = ?)",
        )
        .bind(document_id)
        .fetch_one(pool)
        .await
        .context("Failed to count elements")?;

        Ok(count)
    }
}

pub struct QaHistoryQueries;

impl QaHistoryQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, record: NewQaRecord) -> Result<QaRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let page_references = serde_json::to_string(&record.page_references)
            .context("Failed to encode page references")?;

        sqlx::query(
            "INSERT INTO qa_history (id, document_id, question, answer, response_time_ms, similarity_score, page_references, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&record.document_id)
        .bind(&record.question)
        .bind(&record.answer)
        .bind(record.response_time_ms)
        .bind(record.similarity_score)
        .bind(&page_references)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to record QA history")?;

        Self::get_by_id(pool, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve recorded QA entry"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<QaRecord>> {
        let query = format!("SELECT {} FROM qa_history WHERE id = ?", QA_COLUMNS);
        let record = sqlx::query_as::<_, QaRecord>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get QA entry")?;

        Ok(record)
    }

    /// Most recent first
    #[inline]
    pub async fn list_by_document(
        pool: &SqlitePool,
        document_id: &str,
        limit: i64,
    ) -> Result<Vec<QaRecord>> {
        let query = format!(
            "SELECT {} FROM qa_history WHERE document_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
            QA_COLUMNS
        );
        let records = sqlx::query_as::<_, QaRecord>(&query)
            .bind(document_id)
            .bind(limit)
            .fetch_all(pool)
            .await
            .context("Failed to list QA history")?;

        Ok(records)
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM qa_history WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete QA entry")?;

        Ok(result.rows_affected() > 0)
    }
}
