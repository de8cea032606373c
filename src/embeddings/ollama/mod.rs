
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{Embedder, TaskMode};
use crate::config::OllamaConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;
pub const DEFAULT_MAX_INPUT_CHARS: usize = 2048;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Blocking HTTP access to an Ollama server with retry on transient faults
#[derive(Debug, Clone)]
pub struct OllamaTransport {
    base_url: Url,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff_base: Duration,
}

impl OllamaTransport {
    #[inline]
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        Self {
            base_url,
            agent: Self::build_agent(timeout),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    fn build_agent(timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into()
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = Self::build_agent(timeout);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    #[inline]
    pub fn get(&self, path: &str) -> Result<String> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {}", path))?;

        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    #[inline]
    pub fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<String> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {}", path))?;
        let request_json = serde_json::to_string(body).context("Failed to serialize request")?;

        self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    /// Faults worth another attempt: overloaded or restarting server, timeouts, dropped connections
    fn is_transient(error: &ureq::Error) -> bool {
        match error {
            ureq::Error::StatusCode(status) => matches!(*status, 500 | 503),
            ureq::Error::ConnectionFailed | ureq::Error::Timeout(_) => true,
            ureq::Error::Io(io) => matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::TimedOut
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .backoff_base
            .saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt - 1));
        let jitter_ceiling = u64::try_from(self.backoff_base.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        };
        exponential.saturating_add(Duration::from_millis(jitter))
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) if Self::is_transient(&error) => {
                    warn!(
                        "Transient error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = self.backoff_delay(attempt);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
                Err(error) => {
                    warn!("Non-retryable error: {}", error);
                    return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

/// Embedding client for an Ollama-served embedding model
#[derive(Debug, Clone)]
pub struct OllamaClient {
    transport: OllamaTransport,
    model: String,
    embedding_dimension: usize,
    max_input_chars: usize,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            transport: OllamaTransport::new(
                base_url,
                Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            ),
            model: config.model.clone(),
            embedding_dimension: config.embedding_dimension as usize,
            max_input_chars: config.max_input_chars,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: OllamaTransport) -> Self {
        self.transport = transport;
        self
    }

    #[inline]
    pub fn transport(&self) -> &OllamaTransport {
        &self.transport
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!(
            "Performing health check for Ollama at {}",
            self.transport.base_url()
        );

        let models = self.list_models().context("Server ping failed")?;
        if !models.iter().any(|m| m.name == self.model) {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            return Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ));
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.transport.base_url(),
            self.model
        );
        Ok(())
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response_text = self
            .transport
            .get("/api/tags")
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Prefix for the task mode and cut to the input limit
    fn prepare_input(&self, text: &str, mode: TaskMode) -> String {
        let char_count = text.chars().count();
        let body = if char_count > self.max_input_chars {
            warn!(
                "Embedding input of {} characters truncated to {}",
                char_count, self.max_input_chars
            );
            match text.char_indices().nth(self.max_input_chars) {
                Some((cut, _)) => &text[..cut],
                None => text,
            }
        } else {
            text
        };

        format!("{}{}", mode.prefix(), body)
    }

    /// Embed one text; errors carry the reason for logging
    #[inline]
    pub fn generate_embedding(&self, text: &str, mode: TaskMode) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(anyhow::anyhow!("Cannot embed empty text"));
        }

        let request = EmbedRequest {
            model: &self.model,
            input: self.prepare_input(text, mode),
        };
        debug!(
            "Generating {:?} embedding for text (length: {})",
            mode,
            request.input.len()
        );

        let response_text = self
            .transport
            .post_json("/api/embed", &request)
            .context("Failed to generate embedding")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        let embedding = embed_response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no vectors"))?;

        if embedding.len() != self.embedding_dimension {
            return Err(anyhow::anyhow!(
                "Embedding has {} dimensions, expected {}",
                embedding.len(),
                self.embedding_dimension
            ));
        }

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }
}

impl Embedder for OllamaClient {
    #[inline]
    fn embed(&self, text: &str, mode: TaskMode) -> Option<Vec<f32>> {
        match self.generate_embedding(text, mode) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                error!("Embedding failed: {:#}", e);
                None
            }
        }
    }
}
