//! Exact brute-force vector store.
//!
//! Vectors live in one flat `Vec<f32>` scanned under squared Euclidean
//! distance; scores are `1 / (1 + d²)`, monotonic in similarity and bounded
//! in (0, 1]. Deletion is not supported (a rebuild is required), so the
//! capability flag stays false. `save`/`load` persist two artifacts under the
//! index directory: `flat.vectors` (raw little-endian f32) and
//! `flat.meta.json` (dimension + parallel id/payload tables).

use std::path::Path;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{Filter, Payload, SearchHit, StoreError, VectorStore, check_parallel_lengths};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const VECTORS_FILE: &str = "flat.vectors";
const META_FILE: &str = "flat.meta.json";

pub struct FlatStore {
    dimension: usize,
    inner: RwLock<FlatInner>,
}

#[derive(Default)]
struct FlatInner {
    /// Row-major matrix, `ids.len() * dimension` floats.
    vectors: Vec<f32>,
    ids: Vec<String>,
    payloads: Vec<Payload>,
}

/// On-disk payload/id table, parallel to the vectors artifact.
#[derive(Serialize, Deserialize)]
struct FlatMeta {
    dimension: usize,
    ids: Vec<String>,
    payloads: Vec<Payload>,
}

impl FlatStore {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(FlatInner::default()),
        }
    }
}

/// Squared Euclidean distance between two equal-length vectors.
fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn matches_filter(payload: &Payload, filter: &Filter) -> bool {
    filter.iter().all(|(k, v)| payload.get(k) == Some(v))
}

#[async_trait]
impl VectorStore for FlatStore {
    async fn add_documents(
        &self,
        vectors: &[Vec<f32>],
        payloads: &[Payload],
        ids: Option<&[String]>,
    ) -> Result<(), StoreError> {
        check_parallel_lengths(vectors.len(), payloads.len(), ids.map(<[String]>::len))?;

        for vector in vectors {
            if vector.len() != self.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }

        let mut inner = self.inner.write().await;
        let start = inner.ids.len();
        for (i, (vector, payload)) in vectors.iter().zip(payloads.iter()).enumerate() {
            inner.vectors.extend_from_slice(vector);
            inner.payloads.push(payload.clone());
            let id = match ids {
                Some(ids) => ids[i].clone(),
                None => format!("vec-{}", start + i),
            };
            inner.ids.push(id);
        }

        debug!(added = vectors.len(), total = inner.ids.len(), "flat store updated");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let inner = self.inner.read().await;
        let mut scored: Vec<(f32, usize)> = Vec::new();

        for (row, payload) in inner.payloads.iter().enumerate() {
            if let Some(filter) = filter {
                if !matches_filter(payload, filter) {
                    continue;
                }
            }
            let offset = row * self.dimension;
            let vector = &inner.vectors[offset..offset + self.dimension];
            let score = 1.0 / (1.0 + squared_distance(query, vector));
            scored.push((score, row));
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, row)| SearchHit {
                id: inner.ids[row].clone(),
                score,
                payload: inner.payloads[row].clone(),
            })
            .collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        *inner = FlatInner::default();
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().await.ids.len())
    }

    async fn save(&self, dir: &Path) -> Result<(), StoreError> {
        let inner = self.inner.read().await;
        std::fs::create_dir_all(dir)?;

        let bytes: &[u8] = bytemuck::cast_slice(&inner.vectors);
        std::fs::write(dir.join(VECTORS_FILE), bytes)?;

        let meta = FlatMeta {
            dimension: self.dimension,
            ids: inner.ids.clone(),
            payloads: inner.payloads.clone(),
        };
        std::fs::write(dir.join(META_FILE), serde_json::to_vec(&meta)?)?;

        info!(count = inner.ids.len(), dir = %dir.display(), "flat index saved");
        Ok(())
    }

    async fn load(&self, dir: &Path) -> Result<(), StoreError> {
        let meta_path = dir.join(META_FILE);
        let vectors_path = dir.join(VECTORS_FILE);

        let meta: FlatMeta = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
        if meta.dimension != self.dimension {
            // Fatal for the local store: a rebuild is required
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: meta.dimension,
            });
        }

        let bytes = std::fs::read(&vectors_path)?;
        let vectors: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
        if vectors.len() != meta.ids.len() * meta.dimension
            || meta.ids.len() != meta.payloads.len()
        {
            return Err(StoreError::Persistence(format!(
                "inconsistent index artifacts in {}",
                dir.display()
            )));
        }

        let mut inner = self.inner.write().await;
        *inner = FlatInner {
            vectors,
            ids: meta.ids,
            payloads: meta.payloads,
        };

        info!(count = inner.ids.len(), dir = %dir.display(), "flat index loaded");
        Ok(())
    }
}
