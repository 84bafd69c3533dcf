/// Mock embedder for testing purposes.
///
/// Generates deterministic, L2-normalized embeddings seeded from a text hash,
/// so pipeline tests run without a model or a network.
use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;

use super::{Embedder, EmbedderError, EmbeddingProvider, model_identity_hash};

pub struct MockEmbedder {
    pub dimension: usize,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let bytes = hasher.finish().to_le_bytes();

        let mut embedding = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            embedding.push(bytes[i % 8] as f32 / 255.0);
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimension: 384 }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn dimension(&self) -> Result<usize, EmbedderError> {
        Ok(self.dimension)
    }

    fn model_hash(&self) -> String {
        model_identity_hash(EmbeddingProvider::Mock, &format!("mock-{}", self.dimension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embed_dimension() {
        let embedder = MockEmbedder::new(384);
        let result = embedder.embed_query("hello world").await.unwrap();
        assert_eq!(result.len(), 384);
        assert_eq!(embedder.dimension().await.unwrap(), 384);
    }

    #[tokio::test]
    async fn test_mock_embed_deterministic() {
        let embedder = MockEmbedder::new(384);
        let a = embedder.embed_query("hello").await.unwrap();
        let b = embedder.embed_query("hello").await.unwrap();
        assert_eq!(a, b, "same input should produce the same output");
    }

    #[tokio::test]
    async fn test_mock_embed_different_inputs() {
        let embedder = MockEmbedder::new(384);
        let a = embedder.embed_query("hello").await.unwrap();
        let b = embedder.embed_query("world").await.unwrap();
        assert_ne!(a, b, "different inputs should produce different outputs");
    }

    #[tokio::test]
    async fn test_mock_embed_normalized() {
        let embedder = MockEmbedder::new(384);
        let vec = embedder.embed_query("test normalization").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "vector should be approximately unit length, got {norm}"
        );
    }

    #[tokio::test]
    async fn test_mock_embed_batch() {
        let embedder = MockEmbedder::new(128);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = embedder.embed_texts(&texts).await.unwrap();
        assert_eq!(results.len(), 3);
        for vec in &results {
            assert_eq!(vec.len(), 128);
        }
    }

    #[test]
    fn test_mock_model_hash_depends_on_dimension() {
        assert_ne!(
            MockEmbedder::new(128).model_hash(),
            MockEmbedder::new(384).model_hash()
        );
    }
}
