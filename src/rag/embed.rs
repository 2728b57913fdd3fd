use std::collections::HashMap;
use std::sync::Mutex;

use async_openai::{
    config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client as OpenAiClient,
};
use async_trait::async_trait;
use tracing::warn;

use super::config::EmbeddingConfig;
use crate::error::{RelayError, RelayResult};

#[async_trait]
pub trait EmbeddingsProvider: Send + Sync {
    async fn embed(&self, text: &str) -> RelayResult<Vec<f32>>;
}

pub struct OpenAiEmbeddingsClient {
    client: OpenAiClient<OpenAIConfig>,
    model: String,
    expected_dim: usize,
    cache: Mutex<HashMap<String, Vec<f32>>>,
    cache_capacity: usize,
}

impl OpenAiEmbeddingsClient {
    pub fn from_config(config: &EmbeddingConfig) -> RelayResult<Self> {
        let mut openai_config = OpenAIConfig::new().with_api_key(config.api_key.clone());
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url.clone());
        }

        Ok(Self {
            client: OpenAiClient::with_config(openai_config),
            model: config.model.clone(),
            expected_dim: config.vector_dim,
            cache: Mutex::new(HashMap::new()),
            cache_capacity: 512,
        })
    }
}

#[async_trait]
impl EmbeddingsProvider for OpenAiEmbeddingsClient {
    async fn embed(&self, text: &str) -> RelayResult<Vec<f32>> {
        let cache_key = blake3::hash(text.as_bytes()).to_hex().to_string();

        if let Some(hit) = self
            .cache
            .lock()
            .map_err(|_| RelayError::embedding("embedding cache poisoned"))?
            .get(&cache_key)
            .cloned()
        {
            return Ok(hit);
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(text)
            .build()
            .map_err(|err| RelayError::embedding(format!("request build failed: {err}")))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|err| RelayError::embedding(format!("embedding request failed: {err}")))?;

        let embedding = response
            .data
            .first()
            .ok_or_else(|| RelayError::embedding("embedding response missing data"))?
            .embedding
            .clone();

        if embedding.len() != self.expected_dim {
            warn!(
                expected = self.expected_dim,
                actual = embedding.len(),
                "embedding dimension mismatch"
            );
        }

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| RelayError::embedding("embedding cache poisoned"))?;

        if cache.len() >= self.cache_capacity {
            cache.clear();
        }
        cache.insert(cache_key, embedding.clone());

        Ok(embedding)
    }
}

/// Deterministic bag-of-words embedder for offline runs and tests.
///
/// Each lowercase alphanumeric token is hashed into one of `dim` buckets and
/// the resulting count vector is L2-normalized, so texts sharing vocabulary
/// score positive cosine similarity without any network dependency.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIM: usize = 256;

    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

#[async_trait]
impl EmbeddingsProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> RelayResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_ascii_lowercase();
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let bucket =
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize % self.dim;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }
}

/// Cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
