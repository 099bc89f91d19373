//! HTTP embedding providers.
//!
//! - **[`OllamaEmbedder`]** calls `POST {url}/api/embed` on a local Ollama.
//! - **[`OpenAiEmbedder`]** calls `POST {url}/embeddings` with a bearer key
//!   from `OPENAI_API_KEY`.
//! - **[`RetryingEmbedder`]** wraps either one with a per-call timeout and
//!   bounded retries.
//!
//! Use [`create_embedder`] to build the configured stack.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx, connection errors, timeouts → retry
//! - other HTTP 4xx, malformed responses → fail immediately
//! - Backoff: base, 2×base, 4×base, ... (capped at 2^5 × base)

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tracing::{debug, warn};

use uridx_core::embedding::Embedder;
use uridx_core::{Error, Result};

use crate::config::EmbeddingConfig;

fn client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Map a transport error from reqwest onto the core taxonomy.
fn transport_error(err: reqwest::Error, service: &str, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::EmbeddingTimeout(timeout)
    } else {
        Error::EmbeddingUnavailable(format!("{service} connection error: {err}"))
    }
}

/// Classify a non-success HTTP response.
async fn status_error(response: reqwest::Response, service: &str) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("{service} API error {status}: {}", body.trim());
    if status.as_u16() == 429 || status.is_server_error() {
        Error::EmbeddingUnavailable(message)
    } else {
        Error::EmbeddingRejected(message)
    }
}

fn parse_vector(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    let array = value
        .as_array()
        .ok_or_else(|| Error::EmbeddingRejected(format!("invalid response: {what} is not an array")))?;
    let vector: Vec<f32> = array
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<_>>()
        .ok_or_else(|| Error::EmbeddingRejected(format!("invalid response: non-numeric {what}")))?;
    if vector.is_empty() {
        return Err(Error::EmbeddingRejected(format!("invalid response: empty {what}")));
    }
    Ok(vector)
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance.
///
/// Requires an embedding model to be pulled, e.g.
/// `ollama pull nomic-embed-text`.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(url: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: client(timeout)?,
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, &format!("Ollama at {}", self.url), self.timeout))?;

        if !response.status().is_success() {
            return Err(status_error(response, "Ollama").await);
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingRejected(format!("invalid Ollama response: {e}")))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| {
            Error::EmbeddingRejected("invalid Ollama response: missing embeddings array".into())
        })?;
    parse_vector(first, "embedding")
}

// ============ OpenAI ============

/// Embedder backed by the OpenAI embeddings API.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(url: &str, model: &str, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: client(timeout)?,
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let response = self
            .client
            .post(format!("{}/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, "OpenAI", self.timeout))?;

        if !response.status().is_success() {
            return Err(status_error(response, "OpenAI").await);
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingRejected(format!("invalid OpenAI response: {e}")))?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .ok_or_else(|| {
            Error::EmbeddingRejected("invalid OpenAI response: missing data[0].embedding".into())
        })?;
    parse_vector(first, "embedding")
}

// ============ Retry decorator ============

/// Adds a hard per-call deadline and retries transient failures.
pub struct RetryingEmbedder<E> {
    inner: E,
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
}

impl<E: Embedder> RetryingEmbedder<E> {
    pub fn new(inner: E, timeout: Duration, max_retries: u32) -> Self {
        Self {
            inner,
            timeout,
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

#[async_trait]
impl<E: Embedder> Embedder for RetryingEmbedder<E> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
            let result = match tokio::time::timeout(self.timeout, self.inner.embed(text)).await {
                Ok(result) => result,
                Err(_) => Err(Error::EmbeddingTimeout(self.timeout)),
            };
            match result {
                Ok(vector) => {
                    if attempt > 0 {
                        debug!(attempt, "embedding succeeded after retry");
                    }
                    return Ok(vector);
                }
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        model = self.inner.model_name(),
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "embedding failed, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Build the embedder described by `config`, wrapped in [`RetryingEmbedder`].
///
/// # Errors
///
/// Fails for an unknown provider, or for `openai` when `OPENAI_API_KEY`
/// is not set.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider.as_str() {
        "ollama" => {
            let inner = OllamaEmbedder::new(config.base_url(), &config.model, timeout)?;
            Ok(Arc::new(RetryingEmbedder::new(inner, timeout, config.max_retries)))
        }
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            let inner = OpenAiEmbedder::new(config.base_url(), &config.model, api_key, timeout)?;
            Ok(Arc::new(RetryingEmbedder::new(inner, timeout, config.max_retries)))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}
