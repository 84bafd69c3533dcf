//! Embedder trait and backends for mapping text to fixed-length vectors.
//!
//! Backends are selected through [`create_embedder`] keyed on the
//! [`EmbeddingProvider`] config enum. All implementations are `Send + Sync`
//! so they can be shared behind `Arc` and called concurrently.

pub mod infinity;
pub mod local;
pub mod mock;
pub mod openai;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::EmbeddingConfig;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("embedder configuration error: {0}")]
    Config(String),
}

/// Embedding backend identifiers, as they appear in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Local ONNX model loaded from disk.
    #[default]
    Local,
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
    /// Infinity-style generic `/embeddings` endpoint.
    Infinity,
    /// Deterministic hash-based vectors, for tests and dry runs.
    Mock,
}

impl EmbeddingProvider {
    /// Stable name used in identity hashes.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingProvider::Local => "local",
            EmbeddingProvider::OpenAi => "openai",
            EmbeddingProvider::Infinity => "infinity",
            EmbeddingProvider::Mock => "mock",
        }
    }
}

/// Trait for text embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts into vectors, one per input, in input order.
    ///
    /// Provider or network failures are fatal for the whole batch.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Embed a single query string. Delegates to [`Embedder::embed_texts`].
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_texts(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedderError::InvalidResponse("provider returned no embedding".into()))
    }

    /// Dimensionality of the embedding vectors.
    ///
    /// May trigger a one-time probe for backends that learn the dimension
    /// lazily.
    async fn dimension(&self) -> Result<usize, EmbedderError>;

    /// Stable identity hash of the backend + model name, used in the
    /// manager's config hash.
    fn model_hash(&self) -> String;
}

/// Compute the stable identity hash for a backend + model pair.
pub(crate) fn model_identity_hash(provider: EmbeddingProvider, model: &str) -> String {
    let digest = Sha256::digest(format!("{}:{model}", provider.name()).as_bytes());
    // 16 hex chars are plenty for an identity tag
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Lazily resolved embedding dimension, shared by the probe path and the
/// learn-from-first-batch path so the dimension is resolved exactly once.
/// Concurrent probe callers single-flight on the inner [`OnceCell`].
pub(crate) struct DimensionCell {
    cell: OnceCell<usize>,
}

impl DimensionCell {
    pub(crate) fn unresolved() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub(crate) fn resolved(dimension: usize) -> Self {
        Self {
            cell: OnceCell::from(dimension),
        }
    }

    /// Return the dimension, running `probe` at most once across all callers
    /// if it is not yet known.
    pub(crate) async fn get_or_probe<F, Fut>(&self, probe: F) -> Result<usize, EmbedderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<usize, EmbedderError>>,
    {
        self.cell.get_or_try_init(probe).await.copied()
    }

    /// Record a dimension observed from a real batch response. First writer
    /// wins; later observations are ignored.
    pub(crate) fn record(&self, dimension: usize) {
        let _ = self.cell.set(dimension);
    }

    pub(crate) fn get(&self) -> Option<usize> {
        self.cell.get().copied()
    }
}

/// Construct an embedder from configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedderError> {
    match config.provider {
        EmbeddingProvider::Local => {
            let model_dir = config.model_dir.as_ref().ok_or_else(|| {
                EmbedderError::Config("local provider requires embedding.model_dir".into())
            })?;
            Ok(Arc::new(local::LocalEmbedder::new(
                PathBuf::from(model_dir),
                config.model.clone(),
            )))
        }
        EmbeddingProvider::OpenAi => Ok(Arc::new(openai::OpenAiEmbedder::new(
            config.base_url.clone(),
            config.model.clone(),
            config.api_key.clone(),
        ))),
        EmbeddingProvider::Infinity => {
            let base_url = config.base_url.as_ref().ok_or_else(|| {
                EmbedderError::Config("infinity provider requires embedding.base_url".into())
            })?;
            Ok(Arc::new(infinity::InfinityEmbedder::new(
                base_url.clone(),
                config.model.clone(),
                config.api_key.clone(),
            )))
        }
        EmbeddingProvider::Mock => Ok(Arc::new(mock::MockEmbedder::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_hash_stable_and_distinct() {
        let a = model_identity_hash(EmbeddingProvider::OpenAi, "text-embedding-3-small");
        let b = model_identity_hash(EmbeddingProvider::OpenAi, "text-embedding-3-small");
        let c = model_identity_hash(EmbeddingProvider::OpenAi, "text-embedding-3-large");
        let d = model_identity_hash(EmbeddingProvider::Infinity, "text-embedding-3-small");
        assert_eq!(a, b);
        assert_ne!(a, c, "different models must hash differently");
        assert_ne!(a, d, "different providers must hash differently");
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn test_dimension_cell_probe_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cell = DimensionCell::unresolved();
        let probes = AtomicUsize::new(0);

        for _ in 0..3 {
            let dim = cell
                .get_or_probe(|| async {
                    probes.fetch_add(1, Ordering::SeqCst);
                    Ok(768)
                })
                .await
                .unwrap();
            assert_eq!(dim, 768);
        }
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dimension_cell_record_wins_over_probe() {
        let cell = DimensionCell::unresolved();
        cell.record(384);
        let dim = cell.get_or_probe(|| async { Ok(999) }).await.unwrap();
        assert_eq!(dim, 384);
        assert_eq!(cell.get(), Some(384));
    }

    #[test]
    fn test_create_embedder_local_requires_model_dir() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Local,
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[test]
    fn test_create_embedder_mock() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Mock,
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_hash().len(), 16);
    }
}
