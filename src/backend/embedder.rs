use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BackendError;
use crate::semantic::{SemanticModelConfig, embed_text_local};

use super::retry::Retrying;
use super::{classify_http_error, classify_send_error};

pub trait Embedder: Send + Sync {
    fn model(&self) -> &SemanticModelConfig;

    /// One vector per input, in input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;
}

/// Offline embedder. Deterministic, so indexes built with it are
/// reproducible across runs and machines.
pub struct LocalHashEmbedder {
    model: SemanticModelConfig,
}

impl LocalHashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            model: SemanticModelConfig::local(dimensions),
        }
    }
}

impl Embedder for LocalHashEmbedder {
    fn model(&self) -> &SemanticModelConfig {
        &self.model
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        Ok(texts
            .iter()
            .map(|text| embed_text_local(text, self.model.dimensions))
            .collect())
    }
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    http_client: Client,
    base_url: String,
    api_key: String,
    model: SemanticModelConfig,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model_id: &str,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| BackendError::Permanent(format!("http client setup: {error}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: SemanticModelConfig::remote(model_id, dimensions),
        })
    }
}

impl Embedder for HttpEmbedder {
    fn model(&self) -> &SemanticModelConfig {
        &self.model
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let started = std::time::Instant::now();
        let response = self
            .http_client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model.model_id,
                input: texts,
            })
            .send()
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_http_error(status, &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|error| BackendError::Malformed(error.to_string()))?;

        let mut data = parsed.data;
        if data.len() != texts.len() {
            return Err(BackendError::Malformed(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                data.len()
            )));
        }
        data.sort_by_key(|entry| entry.index.unwrap_or(usize::MAX));

        let mut out = Vec::with_capacity(data.len());
        for entry in data {
            if entry.embedding.len() != self.model.dimensions {
                return Err(BackendError::Malformed(format!(
                    "embedding has {} dims, expected {}",
                    entry.embedding.len(),
                    self.model.dimensions
                )));
            }
            out.push(entry.embedding);
        }

        debug!(
            model_id = %self.model.model_id,
            batch = texts.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "embedding batch completed"
        );
        Ok(out)
    }
}

impl<E: Embedder> Embedder for Retrying<E> {
    fn model(&self) -> &SemanticModelConfig {
        self.inner.model()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        self.policy
            .run("embedding", || self.inner.embed_batch(texts))
    }
}

impl Embedder for Box<dyn Embedder> {
    fn model(&self) -> &SemanticModelConfig {
        self.as_ref().model()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        self.as_ref().embed_batch(texts)
    }
}
