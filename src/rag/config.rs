use std::env;

use crate::error::{RelayError, RelayResult};

/// Embedding backend settings, resolved from the environment.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub vector_dim: usize,
}

impl EmbeddingConfig {
    const API_KEY_VARS: [&'static str; 2] = ["RELAY_EMBEDDING_API_KEY", "OPENAI_API_KEY"];
    const BASE_URL_VARS: [&'static str; 2] = ["RELAY_EMBEDDING_BASE_URL", "OPENAI_BASE_URL"];
    const MODEL_VARS: [&'static str; 1] = ["RELAY_EMBEDDING_MODEL"];
    const VECTOR_DIM_VARS: [&'static str; 1] = ["RELAY_VECTOR_DIM"];

    /// Fails when no API key is configured so callers can fall back to the
    /// deterministic offline embedder.
    pub fn from_env() -> RelayResult<Self> {
        let api_key = read_env(&Self::API_KEY_VARS).ok_or_else(|| {
            RelayError::embedding(
                "Set RELAY_EMBEDDING_API_KEY (or OPENAI_API_KEY) to use hosted embeddings",
            )
        })?;
        let model = read_env(&Self::MODEL_VARS)
            .unwrap_or_else(|| "text-embedding-3-small".to_string());
        let vector_dim: usize = read_env(&Self::VECTOR_DIM_VARS)
            .and_then(|value| value.parse().ok())
            .unwrap_or(1536);

        Ok(Self {
            api_key,
            base_url: read_env(&Self::BASE_URL_VARS),
            model,
            vector_dim,
        })
    }
}

/// Settings for the Chroma-compatible vector store backend.
#[derive(Debug, Clone)]
pub struct ChromaConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub http_timeout_ms: u64,
}

impl ChromaConfig {
    const BASE_URL_VARS: [&'static str; 2] = ["RELAY_CHROMA_URL", "CHROMA_URL"];
    const API_TOKEN_VARS: [&'static str; 2] = ["RELAY_CHROMA_TOKEN", "CHROMA_TOKEN"];
    const TIMEOUT_VARS: [&'static str; 1] = ["RELAY_CHROMA_TIMEOUT_MS"];

    /// Fails when no base URL is configured so callers can fall back to the
    /// in-memory store.
    pub fn from_env() -> RelayResult<Self> {
        let base_url = read_env(&Self::BASE_URL_VARS).ok_or_else(|| {
            RelayError::storage("Set RELAY_CHROMA_URL to use a persistent vector store")
        })?;
        let http_timeout_ms = read_env(&Self::TIMEOUT_VARS)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(10_000);

        Ok(Self {
            base_url,
            api_token: read_env(&Self::API_TOKEN_VARS),
            http_timeout_ms,
        })
    }
}

fn read_env(candidates: &[&'static str]) -> Option<String> {
    candidates.iter().find_map(|key| env::var(key).ok())
}
