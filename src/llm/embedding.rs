//! Text embedding backends used to rank clip captions.
//!
//! `OpenAIEmbedder` talks to an embeddings endpoint; `HashingEmbedder` is a
//! deterministic offline fallback (feature hashing of word tokens) used in lite
//! mode without an endpoint and in tests.

use crate::error::DiscoveryError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::retry::{retry_with_backoff, BackoffPolicy};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Embedding requests in flight at once; output order is preserved
const MAX_CONCURRENT_BATCHES: usize = 4;

/// Embedding backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EmbeddingProvider {
    OpenAI,
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    /// Captions sent per embeddings request
    pub batch_size: usize,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            endpoint: None,
            api_key: None,
            model: "text-embedding-3-large".to_string(),
            dimension: 3072,
            batch_size: 128,
            timeout_seconds: 120,
        }
    }
}

/// Trait for text embedding backends
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::OpenAI => Ok(Arc::new(OpenAIEmbedder::new(config.clone())?)),
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
    }
}

/// Deterministic bag-of-words embedder using md5 feature hashing
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = md5::compute(token.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
            ]);
            let index = (bucket % self.dimension as u64) as usize;
            // sign bit from a different byte keeps collisions from only adding up
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible embeddings endpoint
pub struct OpenAIEmbedder {
    config: EmbeddingConfig,
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl OpenAIEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if config.api_key.is_none() && config.endpoint.is_none() {
            return Err(anyhow!("OpenAI embeddings need an API key or a custom endpoint"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            client,
            backoff: BackoffPolicy::default(),
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.config.endpoint.as_deref().unwrap_or(OPENAI_EMBEDDINGS_URL);
        let body = EmbeddingRequest {
            input: batch,
            model: &self.config.model,
        };

        let mut builder = self.client.post(url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(DiscoveryError::Generation(format!("Embeddings API error {}: {}", status, text)).into());
            }
            return Err(anyhow!("Embeddings API error {}: {}", status, text));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl OpenAIEmbedder {
    async fn embed_chunk(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!("Embedding batch of {} captions", batch.len());

        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = retry_with_backoff(self.backoff, || self.embed_batch(batch)).await;
            match result {
                Ok(v) if v.len() == batch.len() => return Ok(v),
                Ok(v) if attempts < 3 => {
                    warn!("Embedding count mismatch ({} for {} inputs), retrying", v.len(), batch.len());
                }
                Err(e) if attempts < 3 => warn!("Error in embedding batch, retrying: {}", e),
                Ok(v) => {
                    return Err(anyhow!("Failed to get embeddings: got {} for {} inputs", v.len(), batch.len()))
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_in_batches(inputs, self.config.batch_size, |batch| async move { self.embed_chunk(&batch).await }).await
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

/// Run `embed_batch` over `batch_size` chunks of `inputs`, at most
/// [`MAX_CONCURRENT_BATCHES`] at a time, concatenating results in input order
async fn embed_in_batches<F, Fut>(inputs: &[String], batch_size: usize, embed_batch: F) -> Result<Vec<Vec<f32>>>
where
    F: Fn(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<Vec<f32>>>>,
{
    let batch_size = batch_size.max(1);
    let mut embeddings = Vec::with_capacity(inputs.len());

    for group in inputs.chunks(batch_size * MAX_CONCURRENT_BATCHES) {
        let pending: Vec<Fut> = group.chunks(batch_size).map(|batch| embed_batch(batch.to_vec())).collect();
        for batch in try_join_all(pending).await? {
            embeddings.extend(batch);
        }
    }

    Ok(embeddings)
}

/// Cosine similarity, `None` when either side is degenerate or dimensions differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}
