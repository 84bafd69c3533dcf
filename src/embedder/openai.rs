/// OpenAI-compatible embedding backend.
///
/// Speaks the standard `/embeddings` wire contract:
/// `POST {base_url}/embeddings` with `{"model": ..., "input": [...]}`,
/// response `{"data": [{"embedding": [...]}, ...]}`.
///
/// Dimensions of recognized models come from a static table; unknown models
/// resolve lazily, either from the first real batch response or via a
/// dedicated one-item probe request if queried first. Both paths funnel
/// through one [`DimensionCell`], so the dimension is learned exactly once.
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DimensionCell, Embedder, EmbedderError, EmbeddingProvider, model_identity_hash};
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Providers cap embeddings requests; 100 inputs per call is the common limit.
const MAX_BATCH_SIZE: usize = 100;

/// Output dimensions of well-known embedding models.
fn known_model_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

// ── Wire types (shared with the Infinity backend) ────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct EmbeddingsRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingsResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingData {
    pub embedding: Vec<f32>,
}

/// Issue one `/embeddings` call and return the vectors in input order.
pub(crate) async fn post_embeddings(
    client: &Client,
    base_url: &str,
    api_key: Option<&str>,
    model: &str,
    input: &[String],
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let url = format!("{}/embeddings", base_url.trim_end_matches('/'));

    let mut request = client.post(&url).json(&EmbeddingsRequest { model, input });
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let response = request.send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        return Err(EmbedderError::Provider(format!(
            "{url} returned {status}: {body}"
        )));
    }

    let parsed: EmbeddingsResponse = response
        .json()
        .await
        .map_err(|e| EmbedderError::InvalidResponse(format!("malformed embeddings body: {e}")))?;

    if parsed.data.len() != input.len() {
        return Err(EmbedderError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            input.len(),
            parsed.data.len()
        )));
    }

    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

// ── Backend ──────────────────────────────────────────────────────────

pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: DimensionCell,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<String>, model: String, api_key: Option<String>) -> Self {
        let dimension = match known_model_dimension(&model) {
            Some(dim) => DimensionCell::resolved(dim),
            None => DimensionCell::unresolved(),
        };
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model,
            api_key,
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_BATCH_SIZE) {
            debug!(batch_len = batch.len(), model = %self.model, "requesting embeddings");
            let batch_vectors = post_embeddings(
                &self.client,
                &self.base_url,
                self.api_key.as_deref(),
                &self.model,
                batch,
            )
            .await?;

            if let Some(first) = batch_vectors.first() {
                self.dimension.record(first.len());
            }
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }

    async fn dimension(&self) -> Result<usize, EmbedderError> {
        self.dimension
            .get_or_probe(|| async {
                debug!(model = %self.model, "probing embedding dimension");
                let probe = ["dimension probe".to_string()];
                let vectors = post_embeddings(
                    &self.client,
                    &self.base_url,
                    self.api_key.as_deref(),
                    &self.model,
                    &probe,
                )
                .await?;
                vectors
                    .first()
                    .map(Vec::len)
                    .ok_or_else(|| {
                        EmbedderError::InvalidResponse("probe returned no embedding".into())
                    })
            })
            .await
    }

    fn model_hash(&self) -> String {
        model_identity_hash(EmbeddingProvider::OpenAi, &self.model)
    }
}
