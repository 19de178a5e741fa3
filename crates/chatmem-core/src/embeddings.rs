//! ============================================================================
//! Embedding Providers - text to fixed-length vectors
//! ============================================================================
//! - `HttpEmbeddingProvider`: OpenAI-compatible `/embeddings` endpoint
//! - `HashingEmbedder`: deterministic offline embedder (token feature hashing)
//! ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{EmbeddingBackend, MemoryConfig};
use crate::error::{MemoryError, MemoryResult};

/// Default embedding model (OpenAI compatible)
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default vector dimension (all-MiniLM-L6-v2 class models)
pub const DEFAULT_DIMENSION: usize = 384;

/// Maps text to a fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn encode(&self, text: &str) -> MemoryResult<Vec<f32>>;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Model identifier; vectors are only comparable within one model
    fn model(&self) -> &str;
}

// ============================================================================
// HTTP provider
// ============================================================================

/// Embedding client for OpenAI-compatible APIs
pub struct HttpEmbeddingProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    model: String,
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct EmbeddingUsage {
    prompt_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(api_key: String, base_url: String, model: String, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimension,
        }
    }

    /// OpenAI endpoint with the default model
    pub fn openai(api_key: String, dimension: usize) -> Self {
        Self::new(
            api_key,
            "https://api.openai.com/v1".to_string(),
            DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generate embeddings for multiple texts, in input order
    pub async fn embed_batch(&self, texts: &[&str]) -> MemoryResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts.to_vec(),
            dimensions: Some(self.dimension),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                MemoryError::EmbeddingUnavailable(format!("Failed to send embedding request: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            MemoryError::EmbeddingUnavailable(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            // Try to parse error response
            if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(MemoryError::EmbeddingUnavailable(format!(
                    "Embedding API error ({}): {}",
                    status, error.error.message
                )));
            }
            return Err(MemoryError::EmbeddingUnavailable(format!(
                "Embedding API error ({}): {}",
                status, body
            )));
        }

        let embedding_response: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            MemoryError::EmbeddingUnavailable(format!("Failed to parse embedding response: {}", e))
        })?;

        if let Some(usage) = &embedding_response.usage {
            debug!(
                "Embedding tokens used: {} (model: {})",
                usage.total_tokens, embedding_response.model
            );
        }

        // Sort by index and extract embeddings
        let mut embeddings: Vec<(usize, Vec<f32>)> = embedding_response
            .data
            .into_iter()
            .map(|d| (d.index, d.embedding))
            .collect();
        embeddings.sort_by_key(|(idx, _)| *idx);

        let vectors: Vec<Vec<f32>> = embeddings.into_iter().map(|(_, e)| e).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(MemoryError::DimensionMismatch {
                index: format!("embedding:{}", self.model),
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn encode(&self, text: &str) -> MemoryResult<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::EmbeddingUnavailable("No embedding returned".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Offline hashing embedder
// ============================================================================

/// Deterministic bag-of-words embedder.
///
/// Each lower-cased alphanumeric token is hashed with SHA-256; the first eight
/// bytes pick a bucket and the ninth picks a sign. The result is L2-normalised,
/// so texts sharing vocabulary have high cosine similarity. Empty text maps to
/// the zero vector.
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

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn encode(&self, text: &str) -> MemoryResult<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        "hashing-sha256"
    }
}

/// Build the provider selected by the configuration.
/// Falls back to the hashing embedder when the HTTP backend has no API key.
pub fn create_embedding_provider(config: &MemoryConfig) -> Box<dyn EmbeddingProvider> {
    match config.embedding {
        EmbeddingBackend::Http => match config.embedding_api_key.as_deref() {
            Some(key) if !key.is_empty() => {
                debug!("Using {} for embeddings", config.embedding_base_url);
                Box::new(HttpEmbeddingProvider::new(
                    key.to_string(),
                    config.embedding_base_url.clone(),
                    config.embedding_model.clone(),
                    config.dimension,
                ))
            }
            _ => {
                warn!("No embedding API key available, falling back to hashing embedder");
                Box::new(HashingEmbedder::new(config.dimension))
            }
        },
        EmbeddingBackend::Hashing => Box::new(HashingEmbedder::new(config.dimension)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cosine_similarity;

    #[test]
    fn test_provider_creation() {
        let provider = HttpEmbeddingProvider::openai("test-key".to_string(), 384);
        assert_eq!(provider.base_url(), "https://api.openai.com/v1");
        assert_eq!(provider.model(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(provider.dimension(), 384);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let provider = HttpEmbeddingProvider::openai("test-key".to_string(), 384);
        let result = provider.embed_batch(&[]).await;
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_hashing_embedder_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Weather in Paris tomorrow?");
        let b = embedder.embed("weather in paris TOMORROW");
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_embedder_similarity_tracks_vocabulary() {
        let embedder = HashingEmbedder::new(384);
        let query = embedder.embed("rain in london");
        let related = embedder.embed("Query: will it rain in london Response: light rain");
        let unrelated = embedder.embed("Query: stock prices Response: markets closed");
        assert!(
            cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated),
            "shared tokens should score higher"
        );
        assert!(embedder.embed("").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_create_provider_falls_back_without_key() {
        let config = MemoryConfig {
            embedding: EmbeddingBackend::Http,
            embedding_api_key: None,
            dimension: 32,
            ..MemoryConfig::default()
        };
        let provider = create_embedding_provider(&config);
        assert_eq!(provider.model(), "hashing-sha256");
        assert_eq!(provider.dimension(), 32);
    }
}
