use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chunker::Chunker;
use crate::error::{DocqaError, Result};
use crate::retry::RetryPolicy;

/// Top-level configuration for docqa.
///
/// Loaded from `~/.docqa/config.toml` by default. Each section corresponds
/// to one component of the retrieval pipeline or its transport shim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocqaConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl DocqaConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DocqaConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject settings that cannot work before any component starts.
    pub fn validate(&self) -> Result<()> {
        Chunker::new(self.chunking.chunk_size, self.chunking.chunk_overlap)?;

        if self.retrieval.default_top_k == 0 {
            return Err(DocqaError::Config(
                "retrieval.default_top_k must be at least 1".to_string(),
            ));
        }
        if self.retrieval.max_top_k < self.retrieval.default_top_k {
            return Err(DocqaError::Config(format!(
                "retrieval.max_top_k ({}) is below retrieval.default_top_k ({})",
                self.retrieval.max_top_k, self.retrieval.default_top_k
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(DocqaError::Config(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        match self.embedding.provider.as_str() {
            "ollama" | "mock" | "onnx" => {}
            other => {
                return Err(DocqaError::Config(format!(
                    "unknown embedding provider '{}'",
                    other
                )))
            }
        }
        if self.embedding.provider == "ollama" && self.embedding.model.trim().is_empty() {
            return Err(DocqaError::Config(
                "embedding.model must be set for the ollama provider".to_string(),
            ));
        }
        if self.embedding.provider == "onnx" && self.embedding.model_dir.is_none() {
            return Err(DocqaError::Config(
                "embedding.model_dir must be set for the onnx provider".to_string(),
            ));
        }
        match self.generation.provider.as_str() {
            "ollama" | "mock" => {}
            other => {
                return Err(DocqaError::Config(format!(
                    "unknown generation provider '{}'",
                    other
                )))
            }
        }
        if self.generation.provider == "ollama" && self.generation.model.trim().is_empty() {
            return Err(DocqaError::Config(
                "generation.model must be set for the ollama provider".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved path of the persisted vector index.
    pub fn index_path(&self) -> PathBuf {
        match &self.index.path {
            Some(path) => expand_home(path),
            None => expand_home(&self.general.data_dir).join("vector_store.json"),
        }
    }

    /// Resolved directory holding uploaded documents.
    pub fn documents_dir(&self) -> PathBuf {
        match &self.general.documents_dir {
            Some(dir) => expand_home(dir),
            None => expand_home(&self.general.data_dir).join("documents"),
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the persisted index and uploaded documents.
    pub data_dir: String,
    /// Overrides `<data_dir>/documents` when set.
    pub documents_dir: Option<String>,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.docqa/data".to_string(),
            documents_dir: None,
            log_level: "info".to_string(),
        }
    }
}

/// Chunker window settings, in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn chunker(&self) -> Result<Chunker> {
        Chunker::new(self.chunk_size, self.chunk_overlap)
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved when the caller does not specify one.
    pub default_top_k: usize,
    /// Upper bound on caller-supplied top_k.
    pub max_top_k: usize,
    /// Characters of chunk text kept in answer source excerpts.
    pub excerpt_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 3,
            max_top_k: 50,
            excerpt_chars: 200,
        }
    }
}

/// Vector index persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Overrides `<data_dir>/vector_store.json` when set.
    pub path: Option<String>,
    /// Persist the index after every ingest and clear.
    pub persist_on_change: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: None,
            persist_on_change: true,
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider: "ollama", "mock", or "onnx".
    pub provider: String,
    /// Model name passed to the provider.
    pub model: String,
    /// Provider base URL.
    pub base_url: String,
    /// Expected embedding dimension.
    pub dimensions: usize,
    /// Texts sent per embedding request during ingestion.
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Directory with `model.onnx` and `tokenizer.json` (onnx provider only).
    pub model_dir: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimensions: 768,
            batch_size: 32,
            timeout_secs: 30,
            max_retries: 1,
            model_dir: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(self.timeout_secs), self.max_retries)
    }
}

/// Generation provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Provider: "ollama" or "mock".
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "llama3".to_string(),
            base_url: "http://localhost:11434".to_string(),
            temperature: 0.1,
            timeout_secs: 120,
            max_retries: 1,
        }
    }
}

impl GenerationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(self.timeout_secs), self.max_retries)
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted document upload.
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = DocqaConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.default_top_k, 3);
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.generation.model, "llama3");
        assert_eq!(config.api.port, 8000);
        assert!(config.index.persist_on_change);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let file = create_temp_config(
            r#"
[chunking]
chunk_size = 500
chunk_overlap = 50

[generation]
provider = "mock"
"#,
        );
        let config = DocqaConfig::load(file.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.generation.provider, "mock");
        assert_eq!(config.generation.model, "llama3");
        assert_eq!(config.retrieval.default_top_k, 3);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is not [valid toml");
        assert!(matches!(
            DocqaConfig::load(file.path()),
            Err(DocqaError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = DocqaConfig::default();
        config.api.port = 9100;
        config.embedding.provider = "mock".to_string();
        config.save(&path).unwrap();

        let reloaded = DocqaConfig::load(&path).unwrap();
        assert_eq!(reloaded.api.port, 9100);
        assert_eq!(reloaded.embedding.provider, "mock");
    }

    #[test]
    fn test_validate_rejects_bad_chunking() {
        let mut config = DocqaConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(matches!(config.validate(), Err(DocqaError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = DocqaConfig::default();
        config.retrieval.default_top_k = 0;
        assert!(matches!(config.validate(), Err(DocqaError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = DocqaConfig::default();
        config.embedding.provider = "faiss".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("faiss"));

        let mut config = DocqaConfig::default();
        config.generation.provider = "gpt".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_onnx_requires_model_dir() {
        let mut config = DocqaConfig::default();
        config.embedding.provider = "onnx".to_string();
        assert!(config.validate().is_err());

        config.embedding.model_dir = Some("/models/nomic".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_model() {
        let mut config = DocqaConfig::default();
        config.generation.model = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolved_paths() {
        let mut config = DocqaConfig::default();
        config.general.data_dir = "/srv/docqa".to_string();
        assert_eq!(config.index_path(), PathBuf::from("/srv/docqa/vector_store.json"));
        assert_eq!(config.documents_dir(), PathBuf::from("/srv/docqa/documents"));

        config.index.path = Some("/tmp/index.json".to_string());
        config.general.documents_dir = Some("/tmp/docs".to_string());
        assert_eq!(config.index_path(), PathBuf::from("/tmp/index.json"));
        assert_eq!(config.documents_dir(), PathBuf::from("/tmp/docs"));
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/lib/docqa"), PathBuf::from("/var/lib/docqa"));
    }

    #[test]
    fn test_retry_policies_from_config() {
        let config = DocqaConfig::default();
        let policy = config.generation.retry_policy();
        assert_eq!(policy.timeout, Duration::from_secs(120));
        assert_eq!(policy.max_retries, 1);
    }
}
