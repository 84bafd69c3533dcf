//! Remote vector store backed by a Qdrant collection over its REST API.
//!
//! On first use the collection is created if absent; if it exists with a
//! different vector size than the configured embedder dimension, it is
//! dropped and recreated so incompatible embedding spaces are never mixed.
//! Exact-match filter deletion is supported. `save`/`load` are no-ops since
//! state lives server-side.
//!
//! Qdrant only accepts UUID or integer point ids, so each point id is a UUID
//! derived from the SHA-256 of the caller's string id; the string id rides in
//! the payload under `point_key` and is used for exact-match deletes.

use std::path::Path;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Filter, Payload, SearchHit, StoreError, VectorStore, check_parallel_lengths};
use async_trait::async_trait;

pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
    /// Set once the collection handshake has run.
    ready: OnceCell<()>,
}

// ── Response shapes (only the fields we read) ────────────────────────

#[derive(Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Deserialize)]
struct VectorParams {
    size: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Payload,
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

/// Deterministic UUID for a caller-supplied string id.
fn point_uuid(key: &str) -> Uuid {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Exact-match filter in Qdrant's `must`/`match` form.
fn to_qdrant_filter(filter: &Filter) -> Value {
    let must: Vec<Value> = filter
        .iter()
        .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
        .collect();
    json!({ "must": must })
}

impl QdrantStore {
    #[must_use]
    pub fn new(base_url: String, collection: String, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
            dimension,
            ready: OnceCell::new(),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        Err(StoreError::Remote(format!("qdrant returned {status}: {body}")))
    }

    async fn create_collection(&self) -> Result<(), StoreError> {
        info!(
            collection = %self.collection,
            dimension = self.dimension,
            "creating qdrant collection"
        );
        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": self.dimension, "distance": "Cosine" }
            }))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Create the collection if absent, or recreate it when its stored
    /// vector size differs from the configured embedder dimension.
    async fn ensure_collection(&self) -> Result<(), StoreError> {
        self.ready
            .get_or_try_init(|| async {
                let response = self.client.get(self.collection_url()).send().await?;

                if response.status() == StatusCode::NOT_FOUND {
                    self.create_collection().await?;
                    return Ok(());
                }

                let info: CollectionInfoResponse =
                    Self::check_response(response).await?.json().await?;
                let remote_size = info.result.config.params.vectors.size;

                if remote_size != self.dimension {
                    warn!(
                        collection = %self.collection,
                        remote = remote_size,
                        configured = self.dimension,
                        "collection dimension mismatch, recreating"
                    );
                    let response = self.client.delete(self.collection_url()).send().await?;
                    Self::check_response(response).await?;
                    self.create_collection().await?;
                }

                Ok(())
            })
            .await
            .copied()
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn add_documents(
        &self,
        vectors: &[Vec<f32>],
        payloads: &[Payload],
        ids: Option<&[String]>,
    ) -> Result<(), StoreError> {
        check_parallel_lengths(vectors.len(), payloads.len(), ids.map(<[String]>::len))?;
        self.ensure_collection().await?;

        let mut points = Vec::with_capacity(vectors.len());
        for (i, (vector, payload)) in vectors.iter().zip(payloads.iter()).enumerate() {
            if vector.len() != self.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }

            let key = match ids {
                Some(ids) => ids[i].clone(),
                None => Uuid::new_v4().to_string(),
            };
            let mut payload = payload.clone();
            payload.insert("point_key".to_string(), Value::String(key.clone()));

            points.push(json!({
                "id": point_uuid(&key).to_string(),
                "vector": vector,
                "payload": payload,
            }));
        }

        debug!(points = points.len(), collection = %self.collection, "upserting points");
        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.ensure_collection().await?;

        let mut body = json!({
            "vector": query,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = to_qdrant_filter(filter);
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await?;
        let parsed: SearchResponse = Self::check_response(response).await?.json().await?;

        Ok(parsed
            .result
            .into_iter()
            .map(|point| {
                let id = point
                    .payload
                    .get("point_key")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| point.id.to_string());
                SearchHit {
                    id,
                    score: point.score,
                    payload: point.payload,
                }
            })
            .collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.ensure_collection().await?;
        let response = self.client.delete(self.collection_url()).send().await?;
        Self::check_response(response).await?;
        self.create_collection().await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.ensure_collection().await?;
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        let parsed: CountResponse = Self::check_response(response).await?.json().await?;
        Ok(parsed.result.count)
    }

    /// State lives server-side; nothing to persist.
    async fn save(&self, _dir: &Path) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load(&self, _dir: &Path) -> Result<(), StoreError> {
        Ok(())
    }

    fn supports_delete_by_filter(&self) -> bool {
        true
    }

    async fn delete_by_filter(&self, filter: &Filter) -> Result<usize, StoreError> {
        self.ensure_collection().await?;
        let qdrant_filter = to_qdrant_filter(filter);

        // Qdrant's delete endpoint does not report how many points matched
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "filter": qdrant_filter, "exact": true }))
            .send()
            .await?;
        let counted: CountResponse = Self::check_response(response).await?.json().await?;

        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({ "filter": qdrant_filter }))
            .send()
            .await?;
        Self::check_response(response).await?;

        debug!(deleted = counted.result.count, collection = %self.collection, "points deleted");
        Ok(counted.result.count)
    }
}
