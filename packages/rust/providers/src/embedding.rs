//! Text embedding providers.
//!
//! - [`HashEmbedder`]: deterministic feature-hashing embedder, no network
//! - [`HttpEmbedder`]: OpenAI-compatible `POST /embeddings`
//!
//! Every provider returns vectors of exactly [`EmbeddingProvider::dimensions`]
//! entries; anything else is an [`OpenCraftError::Embedding`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use opencraft_shared::{
    EmbeddingBackend, EmbeddingConfig, OpenCraftError, Result, api_key_from_env,
};

use crate::chat::USER_AGENT;

/// Converts a material name into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the model behind this provider.
    fn model_id(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Construct the provider selected by `[embedding] backend`.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    if config.dimensions == 0 {
        return Err(OpenCraftError::config("embedding.dimensions must be at least 1"));
    }
    let embedder: Arc<dyn EmbeddingProvider> = match config.backend {
        EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(config.dimensions)),
        EmbeddingBackend::Http => Arc::new(HttpEmbedder::from_config(config)?),
    };
    Ok(embedder)
}

fn check_dimensions(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(OpenCraftError::Embedding(format!(
            "expected {expected} dimensions, got {}",
            vector.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Hash embedder
// ---------------------------------------------------------------------------

/// Signed feature hashing over lowercase words and character trigrams.
///
/// Names sharing words or fragments land close together, and the same text
/// always maps to the same unit vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();

        for word in lower.split_whitespace() {
            self.add_feature(&mut v, &format!("w:{word}"), 1.0);

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut v, &format!("g:{gram}"), 0.5);
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(index_bytes) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[index] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-trigram-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }
}

// ---------------------------------------------------------------------------
// HTTP embedder
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OpenCraftError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: api_key_from_env(&config.api_key_env),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OpenCraftError::Embedding(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OpenCraftError::Embedding(format!(
                "{}: HTTP {status}",
                self.endpoint
            )));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            OpenCraftError::Embedding(format!("{}: invalid embedding body: {e}", self.endpoint))
        })?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| OpenCraftError::Embedding("response contained no embedding".into()))?;

        check_dimensions(&vector, self.dimensions)?;
        debug!(dimensions = vector.len(), "embedding received");
        Ok(vector)
    }
}
