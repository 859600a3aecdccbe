use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{JournalError, Result};

/// Top-level configuration for the journal engine.
///
/// Loaded from `~/.journal/config.toml` by default. Each section corresponds
/// to one component; missing sections fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub trends: TrendsConfig,
    #[serde(default)]
    pub digest: DigestConfig,
}

impl JournalConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: JournalConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration if `path` exists, otherwise use defaults.
    ///
    /// A file that exists but does not parse or validate is an error.
    pub fn load_if_present(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| JournalError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the components cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(JournalError::Config("retrieval.top_k must be > 0".into()));
        }
        if self.clustering.k == 0 {
            return Err(JournalError::Config("clustering.k must be > 0".into()));
        }
        if self.clustering.max_iterations == 0 {
            return Err(JournalError::Config(
                "clustering.max_iterations must be > 0".into(),
            ));
        }
        if !(self.clustering.tolerance >= 0.0 && self.clustering.tolerance.is_finite()) {
            return Err(JournalError::Config(
                "clustering.tolerance must be a finite, non-negative number".into(),
            ));
        }
        if self.index.retain_generations == 0 {
            return Err(JournalError::Config(
                "index.retain_generations must be >= 1".into(),
            ));
        }
        match self.embedding.backend.as_str() {
            "onnx" | "mock" => Ok(()),
            other => Err(JournalError::Config(format!(
                "unknown embedding backend '{}', expected 'onnx' or 'mock'",
                other
            ))),
        }
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding journals and the persisted index.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.journal/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Embedding provider selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "onnx" for the sentence-transformer model, "mock" for hash vectors.
    pub backend: String,
    /// Directory containing `model.onnx` and `tokenizer.json`.
    pub model_dir: String,
    /// Vector dimension produced by the mock backend.
    pub mock_dimensions: usize,
    /// Upper bound for a single embed call, in seconds. 0 disables the bound.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "onnx".to_string(),
            model_dir: "~/.journal/models/all-MiniLM-L6-v2".to_string(),
            mock_dimensions: 384,
            timeout_secs: 30,
        }
    }
}

/// Persisted index location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory the index generations are published into.
    pub path: String,
    /// Generations kept on disk after a publish, including the new one.
    pub retain_generations: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: "~/.journal/data/index".to_string(),
            retain_generations: 2,
        }
    }
}

/// Similarity retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of past entries returned per query.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

/// Centroid clustering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Requested number of themes.
    pub k: usize,
    /// Seed for centroid initialisation.
    pub seed: u64,
    /// Upper bound on Lloyd iterations.
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this.
    pub tolerance: f32,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            k: 3,
            seed: 42,
            max_iterations: 300,
            tolerance: 1e-4,
        }
    }
}

/// Emotion trend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendsConfig {
    /// Number of tags reported.
    pub top_n: usize,
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self { top_n: 5 }
    }
}

/// Theme digest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Look-back window in days.
    pub days: u32,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self { days: 7 }
    }
}
