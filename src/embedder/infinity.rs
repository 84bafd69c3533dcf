/// Infinity-style generic HTTP embedding backend.
///
/// Self-hosted embedding servers (Infinity and compatible) expose the same
/// `/embeddings` wire contract as OpenAI without a fixed model catalogue, so
/// the dimension is always learned lazily: from the first real batch, or via
/// a one-item probe if `dimension()` is called before any batch ran.
use reqwest::Client;
use tracing::debug;

use super::openai::post_embeddings;
use super::{DimensionCell, Embedder, EmbedderError, EmbeddingProvider, model_identity_hash};
use async_trait::async_trait;

pub struct InfinityEmbedder {
    client: Client,
    base_url: String,
    model: String,
    /// Optional bearer token; many self-hosted deployments run without auth.
    api_key: Option<String>,
    dimension: DimensionCell,
}

impl InfinityEmbedder {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            model,
            api_key,
            dimension: DimensionCell::unresolved(),
        }
    }
}

#[async_trait]
impl Embedder for InfinityEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        debug!(batch_len = texts.len(), model = %self.model, "requesting embeddings");
        let vectors = post_embeddings(
            &self.client,
            &self.base_url,
            self.api_key.as_deref(),
            &self.model,
            texts,
        )
        .await?;

        if let Some(first) = vectors.first() {
            self.dimension.record(first.len());
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
                vectors.first().map(Vec::len).ok_or_else(|| {
                    EmbedderError::InvalidResponse("probe returned no embedding".into())
                })
            })
            .await
    }

    fn model_hash(&self) -> String {
        model_identity_hash(EmbeddingProvider::Infinity, &self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_hash_differs_from_openai() {
        let infinity = InfinityEmbedder::new(
            "http://localhost:7997".to_string(),
            "bge-small-en".to_string(),
            None,
        );
        let openai =
            super::super::openai::OpenAiEmbedder::new(None, "bge-small-en".to_string(), None);
        // Same model name behind a different backend is a different space.
        assert_ne!(infinity.model_hash(), openai.model_hash());
    }

    #[test]
    fn test_dimension_starts_unresolved() {
        let embedder = InfinityEmbedder::new(
            "http://localhost:7997".to_string(),
            "bge-small-en".to_string(),
            None,
        );
        assert_eq!(embedder.dimension.get(), None);
    }
}
