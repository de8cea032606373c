#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error};

use super::{PageAnalyzer, TextGenerator};
use crate::config::{GenerationConfig, OllamaConfig};
use crate::embeddings::OllamaTransport;
use crate::extraction::{PageAnalysis, page_analysis_schema};

const PAGE_ANALYSIS_PROMPT: &str = "You are reading one page of a technical document. \
Transcribe all text on the page into extracted_text.all_text and describe the page in \
extracted_text.explanation. If the page contains a flowchart, describe every node with a \
short id, its label and its shape, every edge with its source id, target id and optional \
label, and explain the process in flowchart.explanation. Omit flowchart when the page has \
none. Report the page number printed on the page, or \"cover\" when none is visible.";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for a multimodal Ollama model used for answers and page analysis
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    transport: OllamaTransport,
    model: String,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(ollama: &OllamaConfig, generation: &GenerationConfig) -> Result<Self> {
        let base_url = ollama
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            transport: OllamaTransport::new(
                base_url,
                Duration::from_secs(generation.timeout_seconds),
            ),
            model: generation.model.clone(),
        })
    }

    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: OllamaTransport) -> Self {
        self.transport = transport;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn call_generate(&self, request: &GenerateRequest<'_>) -> Result<String> {
        let response_text = self
            .transport
            .post_json("/api/generate", request)
            .context("Failed to call generate endpoint")?;

        let response: GenerateResponse = serde_json::from_str(&response_text)
            .context("Failed to parse generate response")?;

        let text = response.response.trim();
        if text.is_empty() {
            return Err(anyhow::anyhow!("Model returned an empty response"));
        }
        Ok(text.to_string())
    }

    #[inline]
    pub fn generate_text(&self, prompt: &str) -> Result<String> {
        debug!("Generating answer with {} (prompt length: {})", self.model, prompt.len());

        self.call_generate(&GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            images: Vec::new(),
            format: None,
        })
    }

    #[inline]
    pub fn analyze_image(&self, image_path: &Path) -> Result<PageAnalysis> {
        let image = std::fs::read(image_path)
            .with_context(|| format!("Failed to read page image {}", image_path.display()))?;
        debug!(
            "Analyzing page image {} ({} bytes)",
            image_path.display(),
            image.len()
        );

        let response = self.call_generate(&GenerateRequest {
            model: &self.model,
            prompt: PAGE_ANALYSIS_PROMPT,
            stream: false,
            images: vec![STANDARD.encode(&image)],
            format: Some(page_analysis_schema()),
        })?;

        serde_json::from_str(&response).context("Page analysis did not match the schema")
    }
}

impl TextGenerator for OllamaGenerator {
    #[inline]
    fn generate(&self, prompt: &str) -> Option<String> {
        match self.generate_text(prompt) {
            Ok(text) => Some(text),
            Err(e) => {
                error!("Answer generation failed: {:#}", e);
                None
            }
        }
    }
}

impl PageAnalyzer for OllamaGenerator {
    #[inline]
    fn analyze_page(&self, image_path: &Path) -> Option<PageAnalysis> {
        match self.analyze_image(image_path) {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                error!("Page analysis of {} failed: {:#}", image_path.display(), e);
                None
            }
        }
    }
}
