// Generation module
// Answer generation and structured page analysis through a multimodal model

pub mod ollama;

use std::path::Path;

use crate::extraction::PageAnalysis;

pub use ollama::OllamaGenerator;

/// Free-text completion for a prompt; failures surface as `None`
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Option<String>;
}

/// Structured extraction of one rendered page image; failures surface as `None`
pub trait PageAnalyzer: Send + Sync {
    fn analyze_page(&self, image_path: &Path) -> Option<PageAnalysis>;
}
