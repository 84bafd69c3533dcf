/// Local ONNX embedding backend using the `ort` crate.
///
/// Loads an embedding model (e.g. multilingual-e5-small) lazily on first use,
/// runs inference, applies mean pooling with the attention mask, and
/// L2-normalizes the result. The output dimension is learned by encoding one
/// probe string at load time and cached for the lifetime of the backend.
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;
use tracing::info;

use super::{Embedder, EmbedderError, EmbeddingProvider, model_identity_hash};
use async_trait::async_trait;

const PROBE_TEXT: &str = "dimension probe";
const MAX_SEQUENCE_LENGTH: usize = 512;

/// Local ONNX-backed embedder implementing the `Embedder` trait.
///
/// Construction is cheap; the model and tokenizer are loaded on the first
/// embedding or dimension call (single-flight via [`OnceCell`]).
pub struct LocalEmbedder {
    model_dir: PathBuf,
    model_name: String,
    state: OnceCell<LoadedModel>,
}

struct LoadedModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
}

struct TokenizedText {
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
}

impl LocalEmbedder {
    pub fn new(model_dir: PathBuf, model_name: String) -> Self {
        Self {
            model_dir,
            model_name,
            state: OnceCell::new(),
        }
    }

    async fn model(&self) -> Result<&LoadedModel, EmbedderError> {
        self.state
            .get_or_try_init(|| async { load_model(&self.model_dir) })
            .await
    }
}

/// Load session + tokenizer from `model_dir`, then learn the output
/// dimension from one probe inference.
fn load_model(model_dir: &Path) -> Result<LoadedModel, EmbedderError> {
    let model_path = model_dir.join("model.onnx");
    if !model_path.exists() {
        return Err(EmbedderError::ModelLoadFailed(format!(
            "model.onnx not found in {}",
            model_dir.display()
        )));
    }

    info!("Initializing ONNX Runtime...");

    let session = Session::builder()
        .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
        .with_intra_threads(4)
        .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
        .with_inter_threads(4)
        .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
        .commit_from_file(&model_path)
        .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

    info!("ONNX model loaded successfully");

    let tokenizer = load_tokenizer(model_dir)?;
    let mut model = LoadedModel {
        session: Mutex::new(session),
        tokenizer,
        dimension: 0,
    };

    // Learn the output dimension from one probe encoding
    let probe = run_inference(&model, PROBE_TEXT)?;
    model.dimension = probe.len();
    info!(dimension = model.dimension, "Embedding dimension resolved");

    Ok(model)
}

fn load_tokenizer(model_dir: &Path) -> Result<Tokenizer, EmbedderError> {
    let tokenizer_path = model_dir.join("tokenizer.json");
    if !tokenizer_path.exists() {
        return Err(EmbedderError::ModelLoadFailed(format!(
            "tokenizer.json not found in {}",
            model_dir.display()
        )));
    }

    let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| EmbedderError::Tokenizer(format!("failed to load tokenizer: {e}")))?;

    let _ = tokenizer.with_truncation(Some(tokenizers::TruncationParams {
        max_length: MAX_SEQUENCE_LENGTH,
        ..Default::default()
    }));
    tokenizer.with_padding(Some(tokenizers::PaddingParams {
        ..Default::default()
    }));

    Ok(tokenizer)
}

fn tokenize(model: &LoadedModel, text: &str) -> Result<TokenizedText, EmbedderError> {
    let encoding = model
        .tokenizer
        .encode(text, true)
        .map_err(|e| EmbedderError::Tokenizer(format!("failed to encode text: {e}")))?;

    Ok(TokenizedText {
        input_ids: encoding.get_ids().iter().map(|&id| id as i64).collect(),
        attention_mask: encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect(),
    })
}

/// Run one forward pass and return the pooled, normalized embedding.
fn run_inference(model: &LoadedModel, text: &str) -> Result<Vec<f32>, EmbedderError> {
    let tokens = tokenize(model, text)?;
    let seq_len = tokens.input_ids.len();

    // (shape, data) tuple form avoids ndarray version coupling with ort
    let input_ids = Tensor::from_array(([1usize, seq_len], tokens.input_ids.clone()))
        .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
    let attention_mask = Tensor::from_array(([1usize, seq_len], tokens.attention_mask.clone()))
        .map_err(|e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")))?;
    let token_type_ids = Tensor::from_array(([1usize, seq_len], vec![0i64; seq_len]))
        .map_err(|e| EmbedderError::InferenceFailed(format!("token_type_ids error: {e}")))?;

    let mut session = model
        .session
        .lock()
        .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
    let outputs = session
        .run(ort::inputs![
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
            "token_type_ids" => token_type_ids,
        ])
        .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

    // Output shape is [1, seq_len, hidden_size]
    let (_shape, hidden_data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

    if seq_len == 0 || hidden_data.len() % seq_len != 0 {
        return Err(EmbedderError::InferenceFailed(format!(
            "unexpected output size {} for sequence length {seq_len}",
            hidden_data.len()
        )));
    }
    let hidden_size = hidden_data.len() / seq_len;

    let embedding = mean_pooling(hidden_data, &tokens.attention_mask, seq_len, hidden_size);
    Ok(l2_normalize(&embedding))
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let model = self.model().await?;
        texts.iter().map(|t| run_inference(model, t)).collect()
    }

    async fn dimension(&self) -> Result<usize, EmbedderError> {
        Ok(self.model().await?.dimension)
    }

    fn model_hash(&self) -> String {
        model_identity_hash(EmbeddingProvider::Local, &self.model_name)
    }
}

/// Mean pooling over hidden states weighted by attention mask.
///
/// `hidden_data` is a flat array with shape `[1, seq_len, hidden_size]`.
fn mean_pooling(
    hidden_data: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut result = vec![0.0f32; hidden_size];
    let mut mask_sum: f32 = 0.0;

    for t in 0..seq_len {
        let mask = attention_mask[t] as f32;
        mask_sum += mask;

        for h in 0..hidden_size {
            result[h] += hidden_data[t * hidden_size + h] * mask;
        }
    }

    // Average by number of real tokens
    if mask_sum > 0.0 {
        for v in &mut result {
            *v /= mask_sum;
        }
    }

    result
}

/// L2-normalize a vector, returning the normalized copy.
fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return vec.to_vec();
    }

    let inv_norm = 1.0 / norm_sq.sqrt();
    vec.iter().map(|v| v * inv_norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let v = vec![3.0, 4.0];
        let normed = l2_normalize(&v);
        let norm: f32 = normed.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((normed[0] - 0.6).abs() < 1e-6);
        assert!((normed[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero() {
        let v = vec![0.0, 0.0, 0.0];
        assert_eq!(l2_normalize(&v), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mean_pooling_simple() {
        // 1 token, hidden_size=3, attention=1
        let hidden = vec![1.0, 2.0, 3.0];
        let mask = vec![1i64];
        assert_eq!(mean_pooling(&hidden, &mask, 1, 3), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_mean_pooling_with_padding() {
        // 2 tokens, hidden_size=2, second token is padding (mask=0)
        let hidden = vec![1.0, 2.0, 10.0, 20.0];
        let mask = vec![1i64, 0i64];
        // Only the first token contributes
        assert_eq!(mean_pooling(&hidden, &mask, 2, 2), vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_missing_model_dir() {
        let embedder = LocalEmbedder::new(
            PathBuf::from("/nonexistent/path"),
            "multilingual-e5-small".to_string(),
        );
        let err = embedder.dimension().await.unwrap_err();
        assert!(matches!(err, EmbedderError::ModelLoadFailed(_)));
    }

    /// Integration test requiring actual model files.
    #[tokio::test]
    #[ignore]
    async fn test_local_embed() {
        let model_dir = PathBuf::from("models/multilingual-e5-small");
        if !model_dir.join("model.onnx").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let embedder = LocalEmbedder::new(model_dir, "multilingual-e5-small".to_string());
        let vec = embedder.embed_query("Hello, world!").await.unwrap();

        assert_eq!(vec.len(), embedder.dimension().await.unwrap());
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "expected unit vector, got norm={norm}"
        );
    }
}
