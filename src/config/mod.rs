//! Configuration management for newsrag
//!
//! Loads the TOML config file, applies `NEWSRAG_SECTION__KEY` environment
//! overrides and named profiles, then validates the result.

use crate::error::{Result, RagError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub ingestion: IngestionConfig,
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Database file name, relative to `data_dir`
    pub db_file: String,
}

/// Chunk window sizes, in characters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_size: usize,
    pub overlap: usize,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

/// Generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Background ingestion queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub queue_capacity: usize,
    pub max_concurrent: usize,
}

/// Daemon configuration for process and IPC management
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub max_connections: usize,
    /// Seconds a client has to send its request after connecting
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| RagError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.generation_model {
            self.generation.model = model;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(top_k) = overrides.top_k {
            self.retrieval.top_k = top_k;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: NEWSRAG_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            let applied = if let Some(config_key) = key.strip_prefix("NEWSRAG_") {
                self.set_value_from_env(config_key, &value)
            } else if key == "OLLAMA_API_URL" {
                self.set_value_from_env("GENERATION__BASE_URL", &value)
            } else {
                continue;
            };

            if let Err(e) = applied {
                tracing::warn!("Failed to apply env override {}: {}", key, e);
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "GENERATION__BASE_URL" => {
                self.generation.base_url = value.to_string();
            }
            "GENERATION__MODEL" => {
                self.generation.model = value.to_string();
            }
            "GENERATION__TIMEOUT_SECS" => {
                self.generation.timeout_secs = parse_number(path, value)?;
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "RETRIEVAL__TOP_K" => {
                self.retrieval.top_k = parse_number(path, value)?;
            }
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Absolute path of the vector database
    pub fn db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.data_dir).join(&self.storage.db_file)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RagError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("newsrag").join("config.toml"))
    }
}

fn parse_number<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| RagError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}' as a number", value),
    })
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.newsrag");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: data_dir.clone(),
                db_file: "vectors.sqlite".to_string(),
            },
            chunking: ChunkingConfig {
                max_size: 500,
                overlap: 50,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
            },
            retrieval: RetrievalConfig { top_k: 3 },
            generation: GenerationConfig {
                provider: "ollama".to_string(),
                base_url: "http://ollama:11434".to_string(),
                model: "gemma3:27b-cloud".to_string(),
                timeout_secs: 120,
                connect_timeout_secs: 5,
            },
            ingestion: IngestionConfig {
                queue_capacity: 256,
                max_concurrent: 4,
            },
            daemon: DaemonConfig {
                socket_path: data_dir.join("daemon.sock"),
                pid_file: data_dir.join("daemon.pid"),
                log_file: data_dir.join("logs").join("daemon.log"),
                max_connections: 64,
                request_timeout_secs: default_request_timeout_secs(),
            },
            profiles: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_round_trips_through_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let config = Config::default();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.chunking.max_size, 500);
        assert_eq!(loaded.chunking.overlap, 50);
        assert_eq!(loaded.retrieval.top_k, 3);
        assert_eq!(loaded.embedding.dimension, 384);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/newsrag.toml"));
        assert!(matches!(result, Err(RagError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vec![
            ("NEWSRAG_GENERATION__MODEL".to_string(), "llama3".to_string()),
            ("NEWSRAG_RETRIEVAL__TOP_K".to_string(), "5".to_string()),
            ("OLLAMA_API_URL".to_string(), "http://localhost:11434".to_string()),
            ("UNRELATED".to_string(), "ignored".to_string()),
        ]);

        assert_eq!(config.generation.model, "llama3");
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.generation.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_bad_env_override_keeps_value() {
        let mut config = Config::default();
        config.apply_overrides(vec![(
            "NEWSRAG_RETRIEVAL__TOP_K".to_string(),
            "many".to_string(),
        )]);
        assert_eq!(config.retrieval.top_k, 3);
    }

    #[test]
    fn test_profile() {
        let mut config = Config::default();
        config.profiles.insert(
            "deep".to_string(),
            ProfileOverrides {
                top_k: Some(8),
                generation_model: Some("llama3:70b".to_string()),
                ..Default::default()
            },
        );

        config.apply_profile("deep").unwrap();
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.generation.model, "llama3:70b");
        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_db_path() {
        let mut config = Config::default();
        config.storage.data_dir = PathBuf::from("/tmp/newsrag");
        assert_eq!(
            config.db_path(),
            PathBuf::from("/tmp/newsrag/vectors.sqlite")
        );
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            expand_tilde(Path::new("~/.newsrag")),
            home.join(".newsrag")
        );
        assert_eq!(
            expand_tilde(Path::new("/tmp/newsrag")),
            PathBuf::from("/tmp/newsrag")
        );
    }
}
