use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::Confirm;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::embeddings::OllamaClient;
use crate::pipeline::{AnswerRequest, IngestRequest, PageImage, QaPipeline};

const PAGE_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

async fn open_pipeline(config: &Config) -> Result<QaPipeline> {
    QaPipeline::open(config.clone())
        .await
        .context("Failed to open the document stores")
}

/// Page number encoded as the trailing digits of a file stem, e.g. `guide_page_12.png`
#[inline]
pub fn page_number_from_path(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Collect the rendered page images of a document directory, ordered by page number
#[inline]
pub fn collect_page_images(pages_dir: &Path) -> Result<Vec<PageImage>> {
    let entries = std::fs::read_dir(pages_dir)
        .with_context(|| format!("Failed to read page directory: {}", pages_dir.display()))?;

    let mut pages = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| PAGE_IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !is_image {
            continue;
        }

        match page_number_from_path(&path) {
            Some(page_number) if page_number > 0 => pages.push(PageImage { page_number, path }),
            _ => warn!("Skipping image without a page number: {}", path.display()),
        }
    }

    if pages.is_empty() {
        bail!("No page images found in {}", pages_dir.display());
    }

    pages.sort_by_key(|page| page.page_number);
    Ok(pages)
}

/// Ingest a directory of page images as one document
#[inline]
pub async fn ingest_document(
    config: &Config,
    pages_dir: PathBuf,
    name: Option<String>,
    source: Option<PathBuf>,
) -> Result<()> {
    let pages = collect_page_images(&pages_dir)?;
    let filename = match name {
        Some(name) => name,
        None => pages_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("Cannot derive a document name from the page directory; pass --name")?,
    };

    info!("Ingesting {} ({} pages)", filename, pages.len());
    let pipeline = open_pipeline(config).await?;
    let report = pipeline
        .ingest(IngestRequest {
            filename,
            source_path: source,
            pages,
        })
        .await?;

    println!(
        "{} Ingested document {}",
        style("✓").green(),
        style(&report.document_id).cyan()
    );
    println!("  Pages processed: {}", report.pages_processed);
    println!("  Elements indexed: {}", report.elements_indexed);
    if report.elements_skipped > 0 {
        println!(
            "  {} elements skipped (embedding unavailable)",
            style(report.elements_skipped).yellow()
        );
    }
    if report.vectors_reset {
        println!(
            "  {} The vector store was reset during ingestion; re-ingest this and earlier documents",
            style("⚠").yellow()
        );
    }

    Ok(())
}

/// Answer a question against one document
#[inline]
pub async fn ask_question(
    config: &Config,
    document_id: String,
    question: String,
    top_k: Option<usize>,
) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let response = pipeline
        .answer(AnswerRequest {
            document_id,
            question,
            top_k,
            record_history: true,
        })
        .await?;

    println!("{}", response.answer);
    println!();

    if response.evidence.is_empty() {
        println!("{}", style("No supporting evidence found.").dim());
    } else {
        println!("{}", style("Sources:").bold());
        for item in &response.evidence {
            println!(
                "  Page {} [{}] score {:.3}",
                item.page_number, item.element_type, item.similarity_score
            );
        }
    }

    if let Some(score) = response.average_score {
        println!("Average score: {:.3}", score);
    }
    println!("Response time: {} ms", response.response_time_ms);

    Ok(())
}

#[inline]
pub async fn list_documents(config: &Config) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let documents = pipeline.list_documents().await?;

    if documents.is_empty() {
        println!("No documents have been ingested yet.");
        println!("Use 'flowdoc-qa ingest <pages-dir>' to add one.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    println!();

    for document in &documents {
        println!("📄 {} ({})", document.filename, document.document_id);
        println!("   Status: {}", document.status);
        println!("   Pages: {}", document.page_count);
        if let Some(error) = &document.error_message {
            println!("   ⚠️  Error: {}", error);
        }
        println!(
            "   Uploaded: {}",
            document.uploaded_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    let completed = documents.iter().filter(|d| d.is_completed()).count();
    let failed = documents.iter().filter(|d| d.is_failed()).count();

    println!("Summary:");
    println!("  Total Documents: {}", documents.len());
    println!("  Completed: {}", completed);
    println!("  Failed: {}", failed);

    Ok(())
}

/// Delete a document with its vectors, rows and page images
#[inline]
pub async fn delete_document(config: &Config, document_id: &str, yes: bool) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let statistics = pipeline.document_info(document_id).await?;

    println!(
        "Found document: {} ({})",
        statistics.document.filename, statistics.document.document_id
    );
    println!(
        "This removes {} elements and {} recorded answers.",
        statistics.total_elements, statistics.questions_answered
    );

    if !yes
        && !Confirm::new()
            .with_prompt("Delete this document? This action cannot be undone.")
            .default(false)
            .interact()?
    {
        println!("Deletion cancelled.");
        return Ok(());
    }

    if pipeline.delete(document_id).await? {
        println!("{} Document deleted: {}", style("✓").green(), document_id);
    } else {
        println!("Document {} was already gone.", document_id);
    }

    Ok(())
}

#[inline]
pub async fn show_history(config: &Config, document_id: &str, limit: i64) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let records = pipeline.history(document_id, limit).await?;

    if records.is_empty() {
        println!("No questions recorded for {}.", document_id);
        return Ok(());
    }

    for record in &records {
        println!(
            "{} {}",
            style(record.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            style(&record.question).bold()
        );
        println!("  {}", record.answer);
        let pages = record.pages();
        if !pages.is_empty() {
            let pages: Vec<String> = pages.iter().map(ToString::to_string).collect();
            println!("  Pages: {}", pages.join(", "));
        }
        if let Some(score) = record.similarity_score {
            println!("  Score: {:.3}", score);
        }
        println!("  Id: {}", record.id);
        println!();
    }

    Ok(())
}

/// Remove one recorded question and answer
#[inline]
pub async fn forget_history_entry(config: &Config, entry_id: &str) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    if pipeline.delete_history_entry(entry_id).await? {
        println!("{} History entry deleted: {}", style("✓").green(), entry_id);
    } else {
        println!("No history entry with id {}.", entry_id);
    }
    Ok(())
}

/// Show store health and per-document statistics
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 Flowdoc QA Status Report");
    println!("{}", "=".repeat(50));

    println!("\n🔧 Configuration:");
    println!("  Base directory: {}", config.get_base_dir().display());
    println!("  Embedding model: {}", config.ollama.model);
    println!("  Generation model: {}", config.generation.model);
    match config.ollama.ollama_url() {
        Ok(url) => println!("  Ollama URL: {}", url),
        Err(e) => println!("  Ollama URL: invalid ({})", e),
    }

    println!("\n🤖 Ollama:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            match client.health_check() {
                Ok(()) => println!(
                    "  Embedding model {}: {}",
                    config.ollama.model,
                    health_label(true)
                ),
                Err(e) => println!("  {} {:#}", style("Unhealthy:").red(), e),
            }
            if let Ok(models) = client.list_models() {
                let available = models.iter().any(|m| m.name == config.generation.model);
                println!(
                    "  Generation model {}: {}",
                    config.generation.model,
                    health_label(available)
                );
            }
        }
        Err(e) => println!("  Client unavailable ({:#})", e),
    }

    let pipeline = open_pipeline(config).await?;
    let health = pipeline.health().await;

    println!("\n🩺 Health:");
    println!("  SQLite: {}", health_label(health.database));
    println!("  Vector store: {}", health_label(health.vector_store));
    println!("  Recovery state: {:?}", health.vector_state);

    match pipeline.vector_statistics().await {
        Ok((stats, per_document)) => {
            println!("\n🧮 Vectors:");
            println!("  Collection: {}", stats.collection_name);
            println!("  Total embeddings: {}", stats.total_embeddings);
            for document in &per_document {
                println!(
                    "  {}: {} embeddings across {} pages",
                    document.document_id, document.embeddings, document.pages
                );
            }
        }
        Err(e) => println!("\n🧮 Vectors: unavailable ({})", e),
    }

    Ok(())
}

fn health_label(healthy: bool) -> console::StyledObject<&'static str> {
    if healthy {
        style("healthy").green()
    } else {
        style("unavailable").red()
    }
}

/// Drop every stored embedding
#[inline]
pub async fn reset_vectors(config: &Config, yes: bool) -> Result<()> {
    if !yes
        && !Confirm::new()
            .with_prompt("Delete all embeddings? Every document will need to be re-ingested.")
            .default(false)
            .interact()?
    {
        println!("Reset cancelled.");
        return Ok(());
    }

    let pipeline = open_pipeline(config).await?;
    if pipeline.reset_vectors().await {
        println!("{} Vector store reset", style("✓").green());
        Ok(())
    } else {
        bail!("Vector store reset failed; check the logs for details")
    }
}
