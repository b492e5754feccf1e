use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Environment variable consulted when the config file carries no AI key.
pub const AI_API_KEY_ENV: &str = "ETALON_AI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
}

/// Settings for the external text-correction backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub max_retries: u32,
    pub cache_capacity: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.arliai.com/v1/chat/completions".to_string(),
            model: "Meta-Llama-3.1-8B-Instruct".to_string(),
            max_retries: 3,
            cache_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Minimum hybrid score at which a fuzzy benchmark hit is accepted.
    pub benchmark_accept_threshold: f64,
    pub cache_capacity: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            benchmark_accept_threshold: 0.82,
            cache_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub default_threshold: f64,
    pub default_batch_size: usize,
    /// Finished tasks kept in the registry before the oldest are evicted.
    pub retained_tasks: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.75,
            default_batch_size: 100,
            retained_tasks: 64,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity.benchmark_accept_threshold) {
            return Err(CoreError::Config(format!(
                "benchmark_accept_threshold must be within [0, 1], got {}",
                self.similarity.benchmark_accept_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.detection.default_threshold) {
            return Err(CoreError::Config(format!(
                "default_threshold must be within [0, 1], got {}",
                self.detection.default_threshold
            )));
        }
        Ok(())
    }

    /// Resolve the AI credential: config value first, environment second.
    /// Returns `None` when neither is set — callers degrade, never panic.
    pub fn ai_api_key(&self) -> Option<String> {
        self.ai
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(AI_API_KEY_ENV).ok().filter(|key| !key.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_coherent() {
        let config = AppConfig::default();
        assert_eq!(config.detection.default_threshold, 0.75);
        assert_eq!(config.detection.default_batch_size, 100);
        assert!(config.similarity.benchmark_accept_threshold > 0.5);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/etalon.toml")).unwrap();
        assert_eq!(config.ai.max_retries, 3);
    }

    #[test]
    fn parses_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etalon.toml");
        std::fs::write(&path, "[detection]\ndefault_threshold = 0.9\ndefault_batch_size = 50\nretained_tasks = 8\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.detection.default_threshold, 0.9);
        // untouched sections keep their defaults
        assert_eq!(config.ai.cache_capacity, 1000);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etalon.toml");
        std::fs::write(&path, "[detection]\ndefault_threshold = 1.5\ndefault_batch_size = 50\nretained_tasks = 8\n").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
