//! Vector store backends: persisting vectors + payload, similarity search,
//! and optional delete-by-filter.
//!
//! The [`VectorStore`] trait abstracts over an exact in-process store
//! ([`flat::FlatStore`]) and a remote collection store
//! ([`qdrant::QdrantStore`]), selected through [`create_store`] keyed on the
//! [`StoreBackend`] config enum. Deletion is a capability: stores advertise
//! it via [`VectorStore::supports_delete_by_filter`], and the default
//! [`VectorStore::delete_by_filter`] fails with
//! [`StoreError::Unsupported`].

pub mod flat;
pub mod qdrant;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::StoreConfig;

/// Arbitrary JSON payload stored alongside each vector.
pub type Payload = Map<String, Value>;

/// Exact-match metadata filter: every key must equal its value.
pub type Filter = Map<String, Value>;

/// Errors that can occur during vector store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),

    #[error("mismatched argument lengths: {0}")]
    InvalidArguments(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Store backend identifiers, as they appear in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Exact brute-force in-memory store with disk persistence.
    #[default]
    Flat,
    /// Remote Qdrant collection.
    Qdrant,
}

impl StoreBackend {
    /// Stable name used in the config identity hash.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Flat => "flat",
            StoreBackend::Qdrant => "qdrant",
        }
    }
}

/// Parallel-slice arguments to `add_documents` must agree in length.
pub(crate) fn check_parallel_lengths(
    vectors: usize,
    payloads: usize,
    ids: Option<usize>,
) -> Result<(), StoreError> {
    if vectors != payloads {
        return Err(StoreError::InvalidArguments(format!(
            "{vectors} vectors but {payloads} payloads"
        )));
    }
    if let Some(ids) = ids
        && ids != vectors
    {
        return Err(StoreError::InvalidArguments(format!(
            "{vectors} vectors but {ids} ids"
        )));
    }
    Ok(())
}

/// One ranked search result: payload augmented with the store's score and
/// internal id.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Trait for vector store backends.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist vectors with their payloads. `ids` parallels `vectors` when
    /// given; stores assign their own ids otherwise.
    async fn add_documents(
        &self,
        vectors: &[Vec<f32>],
        payloads: &[Payload],
        ids: Option<&[String]>,
    ) -> Result<(), StoreError>;

    /// Similarity search, most similar first, at most `top_k` hits.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// Remove every vector and payload.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Total number of stored vectors.
    async fn count(&self) -> Result<usize, StoreError>;

    /// Persist the store's state under `dir`. No-op for server-side stores.
    async fn save(&self, dir: &Path) -> Result<(), StoreError>;

    /// Restore the store's state from `dir`. No-op for server-side stores.
    async fn load(&self, dir: &Path) -> Result<(), StoreError>;

    /// Whether [`VectorStore::delete_by_filter`] is available.
    fn supports_delete_by_filter(&self) -> bool {
        false
    }

    /// Delete every vector whose payload matches `filter` exactly; returns
    /// the number of deleted vectors.
    async fn delete_by_filter(&self, _filter: &Filter) -> Result<usize, StoreError> {
        Err(StoreError::Unsupported("delete_by_filter"))
    }
}

/// Construct a vector store from configuration.
///
/// `dimension` is the embedder's resolved output dimension; every backend
/// enforces it on write, and the remote backend recreates its collection if
/// the server-side dimension disagrees.
pub fn create_store(
    config: &StoreConfig,
    dimension: usize,
) -> Result<Arc<dyn VectorStore>, StoreError> {
    match config.backend {
        StoreBackend::Flat => Ok(Arc::new(flat::FlatStore::new(dimension))),
        StoreBackend::Qdrant => {
            let url = config.url.clone().ok_or_else(|| {
                StoreError::Remote("qdrant backend requires store.url".to_string())
            })?;
            Ok(Arc::new(qdrant::QdrantStore::new(
                url,
                config.collection.clone(),
                dimension,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    #[test]
    fn test_backend_names() {
        assert_eq!(StoreBackend::Flat.name(), "flat");
        assert_eq!(StoreBackend::Qdrant.name(), "qdrant");
    }

    #[tokio::test]
    async fn test_create_flat_store() {
        let config = StoreConfig::default();
        let store = create_store(&config, 4).unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(!store.supports_delete_by_filter());
    }

    #[test]
    fn test_create_qdrant_requires_url() {
        let config = StoreConfig {
            backend: StoreBackend::Qdrant,
            url: None,
            collection: "c".to_string(),
        };
        assert!(create_store(&config, 4).is_err());
    }

    #[tokio::test]
    async fn test_default_delete_by_filter_unsupported() {
        struct NullStore;

        #[async_trait]
        impl VectorStore for NullStore {
            async fn add_documents(
                &self,
                _: &[Vec<f32>],
                _: &[Payload],
                _: Option<&[String]>,
            ) -> Result<(), StoreError> {
                Ok(())
            }
            async fn search(
                &self,
                _: &[f32],
                _: usize,
                _: Option<&Filter>,
            ) -> Result<Vec<SearchHit>, StoreError> {
                Ok(Vec::new())
            }
            async fn clear(&self) -> Result<(), StoreError> {
                Ok(())
            }
            async fn count(&self) -> Result<usize, StoreError> {
                Ok(0)
            }
            async fn save(&self, _: &Path) -> Result<(), StoreError> {
                Ok(())
            }
            async fn load(&self, _: &Path) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let store = NullStore;
        assert!(!store.supports_delete_by_filter());
        let err = store.delete_by_filter(&Filter::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }
}
