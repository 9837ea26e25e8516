use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::FileType;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_target_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Nearest chunks fetched per query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Run the advanced spreadsheet analyzer; the basic summary is used
    /// when disabled (or when the advanced pass rejects the input).
    #[serde(default = "default_true")]
    pub advanced_tabular: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            advanced_tabular: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generate_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_generate_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    500
}
fn default_generate_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Config {
    /// Chunk target and overlap for a file type. Tabular narratives get a
    /// 1.5x target so analysis blocks stay together; their banners give
    /// the segmenter natural cut points anyway.
    pub fn chunking_for(&self, file_type: FileType) -> (usize, usize) {
        let target = match file_type {
            FileType::Tabular => self.chunking.target_chars * 3 / 2,
            _ => self.chunking.target_chars,
        };
        (target, self.chunking.overlap_chars)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.target_chars == 0 {
        anyhow::bail!("chunking.target_chars must be > 0");
    }
    if config.chunking.overlap_chars == 0
        || config.chunking.overlap_chars >= config.chunking.target_chars
    {
        anyhow::bail!("chunking.overlap_chars must satisfy 0 < overlap < target_chars");
    }
    if config.retrieval.max_results < 1 {
        anyhow::bail!("retrieval.max_results must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }
    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(extra: &str) -> String {
        format!("[db]\npath = \"./data/test.sqlite\"\n{}", extra)
    }

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse(&minimal("")).unwrap();
        assert_eq!(config.chunking.target_chars, 1000);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.retrieval.max_results, 5);
        assert!(!config.embedding.is_enabled());
        assert!(config.extraction.advanced_tabular);
    }

    #[test]
    fn overlap_must_be_below_target() {
        let bad = minimal("[chunking]\ntarget_chars = 100\noverlap_chars = 100\n");
        assert!(parse(&bad).is_err());
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        let bad = minimal("[embedding]\nprovider = \"openai\"\n");
        assert!(parse(&bad).is_err());

        let good = minimal(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        );
        assert!(parse(&good).is_ok());
    }

    #[test]
    fn tabular_documents_get_larger_chunks() {
        let config = parse(&minimal("")).unwrap();
        let (text_target, overlap) = config.chunking_for(FileType::Text);
        let (tabular_target, _) = config.chunking_for(FileType::Tabular);
        assert_eq!(text_target, 1000);
        assert_eq!(overlap, 200);
        assert_eq!(tabular_target, 1500);
    }
}
