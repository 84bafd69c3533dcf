/// Configuration module for vecindex.
///
/// Handles loading, validating, and providing default configuration values
/// for the chunking, embedding, and vector-store layers.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunker::ChunkStrategy;
use crate::embedder::EmbeddingProvider;
use crate::store::StoreBackend;

// ── Default value functions ──────────────────────────────────────────

fn default_kb_id() -> String {
    "default".to_string()
}

fn default_index_dir() -> String {
    "./index".to_string()
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_search_top_k() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_model_name() -> String {
    "multilingual-e5-small".to_string()
}

fn default_collection() -> String {
    "vecindex".to_string()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Identifier partitioning indices of different logical knowledge bases.
    #[serde(default = "default_kb_id")]
    pub kb_id: String,

    /// Directory holding the persisted index artifacts and metadata file.
    #[serde(default = "default_index_dir")]
    pub index_dir: String,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkStrategy,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Semantic strategy only: split on level-2/3 markdown headers first.
    #[serde(default = "default_true")]
    pub respect_headers: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_model_name")]
    pub model: String,

    /// Base URL for remote providers, e.g. `https://api.openai.com/v1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Bearer token for remote providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Local provider only: directory containing `model.onnx` + `tokenizer.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Remote backend only: service URL, e.g. `http://localhost:6333`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_collection")]
    pub collection: String,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            kb_id: default_kb_id(),
            index_dir: default_index_dir(),
            search_top_k: default_search_top_k(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            respect_headers: true,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: default_model_name(),
            base_url: None,
            api_key: None,
            model_dir: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            collection: default_collection(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"vecindex.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "vecindex.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "vecindex.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("invalid config JSON in {path}"))?;

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.kb_id.is_empty(), "kb_id must not be empty");
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            self.chunking.chunk_size > 0,
            "chunking.chunk_size must be positive"
        );

        match self.chunking.strategy {
            ChunkStrategy::FixedOverlap | ChunkStrategy::Semantic => {
                anyhow::ensure!(
                    self.chunking.chunk_overlap < self.chunking.chunk_size,
                    "chunking.chunk_overlap must be smaller than chunk_size"
                );
            }
            ChunkStrategy::Fixed => {}
        }

        match self.embedding.provider {
            EmbeddingProvider::Local => {
                anyhow::ensure!(
                    self.embedding.model_dir.is_some(),
                    "embedding.model_dir is required for the local provider"
                );
            }
            EmbeddingProvider::Infinity => {
                anyhow::ensure!(
                    self.embedding.base_url.is_some(),
                    "embedding.base_url is required for the infinity provider"
                );
            }
            EmbeddingProvider::OpenAi | EmbeddingProvider::Mock => {}
        }

        if self.store.backend == StoreBackend::Qdrant {
            anyhow::ensure!(
                self.store.url.is_some(),
                "store.url is required for the qdrant backend"
            );
            anyhow::ensure!(
                !self.store.collection.is_empty(),
                "store.collection must not be empty"
            );
        }

        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.kb_id, "default");
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.search_top_k, 5);
        assert_eq!(config.embedding.model, "multilingual-e5-small");
        assert_eq!(config.store.collection, "vecindex");
        assert!(config.chunking.respect_headers);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"kb_id": "docs", "chunking": {"chunk_size": 1000}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.kb_id, "docs");
        assert_eq!(config.chunking.chunk_size, 1000);
        // Other fields should have defaults
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.search_top_k, 5);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let json = r#"{"embedding": {"provider": "word2vec"}}"#;
        let result: std::result::Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err(), "unknown provider name must fail to parse");
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let json = r#"{"chunking": {"strategy": "recursive"}}"#;
        let result: std::result::Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_ok() {
        let mut config = Config::default();
        config.embedding.model_dir = Some("./models/e5".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_overlap() {
        let mut config = Config::default();
        config.chunking.strategy = ChunkStrategy::FixedOverlap;
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_qdrant_requires_url() {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProvider::Mock;
        config.store.backend = StoreBackend::Qdrant;
        config.store.url = None;
        assert!(config.validate().is_err());

        config.store.url = Some("http://localhost:6333".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_local_requires_model_dir() {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProvider::Local;
        assert!(config.validate().is_err());

        config.embedding.model_dir = Some("./models/e5".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kb_id, config.kb_id);
        assert_eq!(parsed.chunking.chunk_size, config.chunking.chunk_size);
        assert_eq!(parsed.embedding.model, config.embedding.model);
    }
}
