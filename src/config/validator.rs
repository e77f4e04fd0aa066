use crate::config::Config;
use crate::embedding::FastEmbedProvider;
use crate::error::{Result, RagError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_generation(config, &mut errors);
        Self::validate_ingestion(config, &mut errors);
        Self::validate_daemon(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.db_file.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.db_file",
                "Database file name cannot be empty",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;
        if chunking.overlap == 0 || chunking.overlap >= chunking.max_size {
            errors.push(ValidationError::new(
                "chunking.overlap",
                format!(
                    "Overlap must satisfy 0 < overlap < max_size, got overlap={} max_size={}",
                    chunking.overlap, chunking.max_size
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
            return;
        }

        let dimension = config.embedding.dimension;
        match FastEmbedProvider::declared_dimension(&config.embedding.model) {
            Ok(declared) if dimension != 0 && declared != dimension => {
                errors.push(ValidationError::new(
                    "embedding.dimension",
                    format!(
                        "Model {} produces {}-dimensional vectors, got dimension={}",
                        config.embedding.model, declared, dimension
                    ),
                ));
            }
            Ok(_) => {}
            Err(_) => {
                errors.push(ValidationError::new(
                    "embedding.model",
                    format!(
                        "Unsupported embedding model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                        config.embedding.model
                    ),
                ));
            }
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }
    }

    fn validate_generation(config: &Config, errors: &mut Vec<ValidationError>) {
        let generation = &config.generation;

        let valid_providers = ["ollama"];
        if !valid_providers.contains(&generation.provider.as_str()) {
            errors.push(ValidationError::new(
                "generation.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, generation.provider
                ),
            ));
        }

        if !generation.base_url.starts_with("http://")
            && !generation.base_url.starts_with("https://")
        {
            errors.push(ValidationError::new(
                "generation.base_url",
                format!("Base URL must start with http:// or https://, got '{}'", generation.base_url),
            ));
        }

        if generation.model.is_empty() {
            errors.push(ValidationError::new(
                "generation.model",
                "Model name cannot be empty",
            ));
        }

        if !(1..=600).contains(&generation.timeout_secs) {
            errors.push(ValidationError::new(
                "generation.timeout_secs",
                format!(
                    "Timeout must be between 1 and 600 seconds, got {}",
                    generation.timeout_secs
                ),
            ));
        }

        if generation.connect_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "generation.connect_timeout_secs",
                "Connect timeout must be greater than 0",
            ));
        }
    }

    fn validate_ingestion(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.ingestion.queue_capacity == 0 {
            errors.push(ValidationError::new(
                "ingestion.queue_capacity",
                "Queue capacity must be greater than 0",
            ));
        }

        if config.ingestion.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "ingestion.max_concurrent",
                "Concurrency must be greater than 0",
            ));
        }
    }

    fn validate_daemon(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.daemon.max_connections == 0 {
            errors.push(ValidationError::new(
                "daemon.max_connections",
                "Max connections must be greater than 0",
            ));
        }

        if config.daemon.request_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "daemon.request_timeout_secs",
                "Request timeout must be greater than 0",
            ));
        }

        if config.daemon.socket_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "daemon.socket_path",
                "Socket path cannot be empty",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_paths(config: &Config) -> Vec<String> {
        match ConfigValidator::validate(config) {
            Err(RagError::ConfigValidation { errors }) => {
                errors.into_iter().map(|e| e.path).collect()
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_overlap_not_smaller_than_max_size() {
        let mut config = Config::default();
        config.chunking.overlap = 500;
        assert_eq!(error_paths(&config), vec!["chunking.overlap"]);

        config.chunking.overlap = 0;
        assert_eq!(error_paths(&config), vec!["chunking.overlap"]);
    }

    #[test]
    fn test_empty_embedding_model() {
        let mut config = Config::default();
        config.embedding.model = String::new();
        assert_eq!(error_paths(&config), vec!["embedding.model"]);
    }

    #[test]
    fn test_dimension_must_match_model() {
        let mut config = Config::default();
        config.embedding.dimension = 768;
        assert_eq!(error_paths(&config), vec!["embedding.dimension"]);

        config.embedding.model = "bge-base-en-v1.5".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_unsupported_embedding_model() {
        let mut config = Config::default();
        config.embedding.model = "word2vec".to_string();
        assert_eq!(error_paths(&config), vec!["embedding.model"]);
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        config.generation.base_url = "ollama:11434".to_string();
        config.generation.timeout_secs = 0;

        let paths = error_paths(&config);
        assert_eq!(paths.len(), 3);
        assert!(paths.contains(&"retrieval.top_k".to_string()));
        assert!(paths.contains(&"generation.base_url".to_string()));
        assert!(paths.contains(&"generation.timeout_secs".to_string()));
    }

    #[test]
    fn test_unknown_provider() {
        let mut config = Config::default();
        config.generation.provider = "groq".to_string();
        assert_eq!(error_paths(&config), vec!["generation.provider"]);
    }
}
