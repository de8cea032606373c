// Embeddings module
// Task-aware text embeddings served by Ollama

pub mod ollama;

pub use ollama::{OllamaClient, OllamaTransport};

/// Which side of a retrieval pair the text is embedded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskMode {
    /// Stored content
    Document,
    /// A question searched against stored content
    Query,
}

impl TaskMode {
    /// Input prefix expected by nomic-style embedding models
    #[inline]
    pub fn prefix(self) -> &'static str {
        match self {
            TaskMode::Document => "search_document: ",
            TaskMode::Query => "search_query: ",
        }
    }
}

/// Produces embedding vectors for text
///
/// Failures are logged by the implementation and surface as `None`.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str, mode: TaskMode) -> Option<Vec<f32>>;
}
