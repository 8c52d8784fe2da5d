use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model, recorded in the index at build time
pub const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
/// Default knowledge base confidence threshold
pub const DEFAULT_THRESHOLD: f32 = 0.60;
/// Default number of results retrieved per query
pub const DEFAULT_TOP_K: usize = 3;

const DEFAULT_KB_PATH: &str = "kb/faq.csv";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_MODEL_CACHE_DIR: &str = ".fastembed_cache";
const DEFAULT_BIND: &str = "127.0.0.1:8080";

const DEFAULT_GENERATOR_MODEL: &str = "gpt-4o-mini";
const DEFAULT_GENERATOR_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_GENERATOR_TEMPERATURE: f32 = 0.3;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Settings for the generative fallback.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeneratorConfig {
    /// Disable to never call out to a generator
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Chat model name (overridden by OPENAI_MODEL)
    #[serde(default = "default_generator_model")]
    pub model: String,

    /// OpenAI-compatible API base url (overridden by OPENAI_BASE_URL)
    #[serde(default = "default_generator_base_url")]
    pub base_url: String,

    #[serde(default = "default_generator_temperature")]
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: DEFAULT_GENERATOR_MODEL.to_string(),
            base_url: DEFAULT_GENERATOR_BASE_URL.to_string(),
            temperature: DEFAULT_GENERATOR_TEMPERATURE,
        }
    }
}

impl GeneratorConfig {
    /// Apply OPENAI_MODEL / OPENAI_BASE_URL environment overrides.
    pub fn with_env_overrides(&self) -> Self {
        let mut resolved = self.clone();
        if let Some(model) = non_empty_env("OPENAI_MODEL") {
            resolved.model = model;
        }
        if let Some(base_url) = non_empty_env("OPENAI_BASE_URL") {
            resolved.base_url = base_url;
        }
        resolved
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// CSV knowledge base used by `build`
    #[serde(default = "default_kb_path")]
    pub kb_path: String,

    /// Directory holding vectors.bin and meta.json
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Embedding model used by `build`; queries use the model recorded in the index
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_model_cache_dir")]
    pub model_cache_dir: String,

    /// Knowledge base confidence threshold [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Address for `serve`
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kb_path: default_kb_path(),
            data_dir: default_data_dir(),
            model: default_model(),
            model_cache_dir: default_model_cache_dir(),
            threshold: DEFAULT_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            bind: default_bind(),
            generator: GeneratorConfig::default(),
            base_path: PathBuf::from("."),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_kb_path() -> String {
    DEFAULT_KB_PATH.to_string()
}

fn default_data_dir() -> String {
    DEFAULT_DATA_DIR.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_model_cache_dir() -> String {
    DEFAULT_MODEL_CACHE_DIR.to_string()
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_generator_model() -> String {
    DEFAULT_GENERATOR_MODEL.to_string()
}

fn default_generator_base_url() -> String {
    DEFAULT_GENERATOR_BASE_URL.to_string()
}

fn default_generator_temperature() -> f32 {
    DEFAULT_GENERATOR_TEMPERATURE
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Base directory from FAQBOT_BASE_PATH, or the current directory.
pub fn base_path_from_env() -> PathBuf {
    non_empty_env("FAQBOT_BASE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Invalid(format!(
                "threshold must be between 0.0 and 1.0, got {}",
                self.threshold
            )));
        }

        if self.top_k == 0 {
            return Err(ConfigError::Invalid(
                "top_k must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return Err(ConfigError::Invalid(format!(
                "generator.temperature must be between 0.0 and 2.0, got {}",
                self.generator.temperature
            )));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if absent.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE);
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        if !path.exists() {
            log::info!("Creating default config at {}", path.display());
            std::fs::create_dir_all(base_path).map_err(io_err)?;
            Self {
                base_path: base_path.to_path_buf(),
                ..Default::default()
            }
            .save()?;
        }

        let config_str = std::fs::read_to_string(&path).map_err(io_err)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str).map_err(|source| ConfigError::Io { path, source })
    }

    pub fn kb_path(&self) -> PathBuf {
        self.resolve(&self.kb_path)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve(&self.data_dir)
    }

    pub fn model_cache_dir(&self) -> PathBuf {
        self.resolve(&self.model_cache_dir)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}
