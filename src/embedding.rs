//! Embedding provider abstraction.
//!
//! The pipeline talks to embedding backends through [`EmbeddingProvider`]
//! plus the config-dispatched [`embed_texts`] free function:
//!
//! - **`openai`** — the hosted embeddings API, with exponential backoff for
//!   rate limits and server errors (1s, 2s, 4s, ... capped at 2^5).
//! - **`deterministic`** — offline vectors derived from each chunk's SHA-256;
//!   stable across runs, useful for development and tests.
//! - **`disabled`** — always errors.
//!
//! A failed call fails the whole document's indexing phase: chunk sets are
//! replaced atomically, so there is no partial-embedding state to persist.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;

pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded on each chunk row.
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

/// Embed a batch of texts with the configured backend. Returns one vector
/// per input text, in input order.
pub async fn embed_texts(
    _provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await,
        "deterministic" => Ok(texts
            .iter()
            .map(|t| deterministic_vector(t, config.dims))
            .collect()),
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI Provider ============

pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            model,
            dims: config.dims,
        })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// Call the OpenAI embeddings API.
///
/// Retry strategy: HTTP 429 and 5xx retry with exponential backoff, other
/// 4xx fail immediately, network errors retry.
async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_openai_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "OpenAI API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("OpenAI API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Deterministic Provider ============

/// Offline provider: vectors expanded from the chunk text's SHA-256 digest.
/// Not semantically meaningful, but stable, dimension-correct, and free of
/// network calls.
pub struct DeterministicProvider {
    dims: usize,
}

impl DeterministicProvider {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self { dims: config.dims }
    }
}

impl EmbeddingProvider for DeterministicProvider {
    fn model_name(&self) -> &str {
        "deterministic"
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

fn deterministic_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    (0..dims)
        .map(|i| {
            let byte = digest[i % digest.len()];
            (byte as f32 - 127.5) / 127.5
        })
        .collect()
}

/// Create the configured [`EmbeddingProvider`].
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "deterministic" => Ok(Box::new(DeterministicProvider::new(config))),
        "disabled" => Ok(Box::new(DisabledProvider)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn deterministic_vectors_are_stable_and_sized() {
        let a = deterministic_vector("収支報告書", 1536);
        let b = deterministic_vector("収支報告書", 1536);
        assert_eq!(a.len(), 1536);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn deterministic_vectors_differ_by_text() {
        let a = deterministic_vector("収入", 64);
        let b = deterministic_vector("支出", 64);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn disabled_provider_errors() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        let result = embed_texts(provider.as_ref(), &config, &["text".to_string()]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn deterministic_provider_embeds_in_order() {
        let config = EmbeddingConfig {
            provider: "deterministic".to_string(),
            dims: 16,
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = embed_texts(provider.as_ref(), &config, &texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], deterministic_vector("a", 16));
        assert_eq!(vectors[1], deterministic_vector("b", 16));
    }
}
