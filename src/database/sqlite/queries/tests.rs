use super::*;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await
        .expect("Failed to create test pool");

    sqlx::raw_sql(include_str!("../migrations/001_initial_schema.sql"))
        .execute(&pool)
        .await
        .expect("Failed to run migrations");

    (temp_dir, pool)
}

fn new_document(document_id: &str) -> NewDocument {
    NewDocument {
        document_id: document_id.to_string(),
        filename: "Manual.pdf".to_string(),
        filepath: Some("/tmp/Manual.pdf".to_string()),
    }
}

async fn create_page(pool: &SqlitePool, document_id: &str, page_number: u32) -> i64 {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    PageQueries::create(
        &mut conn,
        &NewDocumentPage {
            document_id: document_id.to_string(),
            page_number,
            page_label: Some(page_number.to_string()),
        },
    )
    .await
    .expect("Failed to create page")
}

#[tokio::test]
async fn document_lifecycle() {
    let (_temp_dir, pool) = create_test_pool().await;

    let document = DocumentQueries::create(&pool, new_document("Manual_0A1B2C3D"))
        .await
        .expect("Failed to create document");
    assert_eq!(document.status, DocumentStatus::Processing);
    assert_eq!(document.page_count, 0);

    DocumentQueries::mark_completed(&pool, "Manual_0A1B2C3D", 3)
        .await
        .expect("Failed to mark completed");
    let document = DocumentQueries::get_by_id(&pool, "Manual_0A1B2C3D")
        .await
        .expect("Failed to get document")
        .expect("Document should exist");
    assert!(document.is_completed());
    assert_eq!(document.page_count, 3);

    DocumentQueries::mark_failed(&pool, "Manual_0A1B2C3D", "analysis unavailable")
        .await
        .expect("Failed to mark failed");
    let document = DocumentQueries::get_by_id(&pool, "Manual_0A1B2C3D")
        .await
        .expect("Failed to get document")
        .expect("Document should exist");
    assert!(document.is_failed());
    assert_eq!(document.error_message.as_deref(), Some("analysis unavailable"));

    assert!(
        DocumentQueries::delete(&pool, "Manual_0A1B2C3D")
            .await
            .expect("Failed to delete")
    );
    assert!(
        !DocumentQueries::delete(&pool, "Manual_0A1B2C3D")
            .await
            .expect("Failed to delete")
    );
}

#[tokio::test]
async fn duplicate_page_is_rejected() {
    let (_temp_dir, pool) = create_test_pool().await;
    DocumentQueries::create(&pool, new_document("Manual_0A1B2C3D"))
        .await
        .expect("Failed to create document");

    create_page(&pool, "Manual_0A1B2C3D", 1).await;

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let duplicate = PageQueries::create(
        &mut conn,
        &NewDocumentPage {
            document_id: "Manual_0A1B2C3D".to_string(),
            page_number: 1,
            page_label: None,
        },
    )
    .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn elements_are_listed_by_document() {
    let (_temp_dir, pool) = create_test_pool().await;
    DocumentQueries::create(&pool, new_document("Manual_0A1B2C3D"))
        .await
        .expect("Failed to create document");
    let page_id = create_page(&pool, "Manual_0A1B2C3D", 2).await;

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    ElementQueries::create(
        &mut conn,
        &NewPageElement {
            element_id: "Manual_0A1B2C3D_page_2_FLOWCHART".to_string(),
            page_id,
            element_type: crate::extraction::ElementType::Flowchart,
            content_json: "{}".to_string(),
            plain_text: "Flowchart: approval".to_string(),
            vector_id: Some("vec-1".to_string()),
        },
    )
    .await
    .expect("Failed to create element");
    drop(conn);

    let elements = ElementQueries::list_by_document(&pool, "Manual_0A1B2C3D")
        .await
        .expect("Failed to list elements");
    assert_eq!(elements.len(), 1);
    assert_eq!(elements[0].element_type, "FLOWCHART");
    assert_eq!(elements[0].vector_id.as_deref(), Some("vec-1"));

    let element = ElementQueries::get_by_element_id(&pool, "Manual_0A1B2C3D_page_2_FLOWCHART")
        .await
        .expect("Failed to get element");
    assert!(element.is_some());
    assert_eq!(
        ElementQueries::count_by_document(&pool, "Manual_0A1B2C3D")
            .await
            .expect("Failed to count"),
        1
    );
}

#[tokio::test]
async fn qa_history_round_trip() {
    let (_temp_dir, pool) = create_test_pool().await;
    DocumentQueries::create(&pool, new_document("Manual_0A1B2C3D"))
        .await
        .expect("Failed to create document");

    let first = QaHistoryQueries::create(
        &pool,
        NewQaRecord {
            document_id: "Manual_0A1B2C3D".to_string(),
            question: "What is step one?".to_string(),
            answer: "Submit the request.".to_string(),
            response_time_ms: 1200,
            similarity_score: Some(0.75),
            page_references: vec![2],
        },
    )
    .await
    .expect("Failed to record");
    assert_eq!(first.pages(), vec![2]);

    QaHistoryQueries::create(
        &pool,
        NewQaRecord {
            document_id: "Manual_0A1B2C3D".to_string(),
            question: "Anything else?".to_string(),
            answer: "No".to_string(),
            response_time_ms: 10,
            similarity_score: None,
            page_references: Vec::new(),
        },
    )
    .await
    .expect("Failed to record");

    let history = QaHistoryQueries::list_by_document(&pool, "Manual_0A1B2C3D", 10)
        .await
        .expect("Failed to list history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].question, "Anything else?");

    let limited = QaHistoryQueries::list_by_document(&pool, "Manual_0A1B2C3D", 1)
        .await
        .expect("Failed to list history");
    assert_eq!(limited.len(), 1);

    assert!(
        QaHistoryQueries::delete(&pool, &first.id)
            .await
            .expect("Failed to delete")
    );
    assert!(
        QaHistoryQueries::get_by_id(&pool, &first.id)
            .await
            .expect("Failed to get")
            .is_none()
    );
}

#[tokio::test]
async fn statistics_count_dependents() {
    let (_temp_dir, pool) = create_test_pool().await;
    DocumentQueries::create(&pool, new_document("Manual_0A1B2C3D"))
        .await
        .expect("Failed to create document");
    create_page(&pool, "Manual_0A1B2C3D", 1).await;
    create_page(&pool, "Manual_0A1B2C3D", 2).await;

    let stats = DocumentQueries::get_statistics(&pool, "Manual_0A1B2C3D")
        .await
        .expect("Failed to get statistics")
        .expect("Document should exist");
    assert_eq!(stats.stored_pages, 2);
    assert_eq!(stats.total_elements, 0);
    assert_eq!(stats.questions_answered, 0);

    assert!(
        DocumentQueries::get_statistics(&pool, "Missing_00000000")
            .await
            .expect("Failed to get statistics")
            .is_none()
    );
}
