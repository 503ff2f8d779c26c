//! Configuration for the ingestion pipeline and query engine
//!
//! Loads configuration from config.yml file

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Error, Result};

/// Default constants (fallback if config.yml not found)
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_MAX_CONTEXT_CHUNKS: usize = 5;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
pub const DEFAULT_ENTITY_LIMIT: usize = 10;
pub const DEFAULT_SUMMARY_CHARS: usize = 500;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_UPLOAD_DIR: &str = "uploads/documents";

/// Which backend serves embeddings and completions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
    /// Hashed embeddings only; no completion model
    Local,
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            "local" => Ok(ProviderKind::Local),
            other => Err(Error::Config(format!("unknown provider: {}", other))),
        }
    }
}

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    openai: Option<OpenAIConfig>,
    models: Option<ModelsConfig>,
    ollama: Option<OllamaConfig>,
    rag: Option<RagConfig>,
    answer: Option<AnswerConfig>,
    extraction: Option<ExtractionConfig>,
    retry: Option<RetryConfig>,
    storage: Option<StorageConfig>,
    neo4j: Option<Neo4jConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIConfig {
    api_key: Option<String>,
    api_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelsConfig {
    provider: Option<String>,
    chat: Option<String>,
    embedding: Option<String>,
    embedding_dimensions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaConfig {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RagConfig {
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    max_context_chunks: Option<usize>,
    similarity_threshold: Option<f32>,
    entity_limit: Option<usize>,
    summary_chars: Option<usize>,
    concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct AnswerConfig {
    language: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractionConfig {
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RetryConfig {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageConfig {
    upload_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Neo4jConfig {
    uri: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

/// Chunking and retrieval knobs
#[derive(Debug, Clone, PartialEq)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_context_chunks: usize,
    pub similarity_threshold: f32,
    pub entity_limit: usize,
    pub summary_chars: usize,
    pub concurrency: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_context_chunks: DEFAULT_MAX_CONTEXT_CHUNKS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            entity_limit: DEFAULT_ENTITY_LIMIT,
            summary_chars: DEFAULT_SUMMARY_CHARS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Sampling settings for one kind of completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Backoff for provider calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_api_url: String,
    pub openai_timeout_secs: u64,
    pub provider: ProviderKind,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: Option<usize>,
    pub ollama_url: String,
    pub rag: RagSettings,
    pub answer_language: String,
    pub answer: CompletionSettings,
    pub extraction: CompletionSettings,
    pub retry: RetrySettings,
    pub upload_dir: PathBuf,
    /// None selects the in-memory store
    pub neo4j: Option<Neo4jSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    /// Environment variables take precedence over config.yml values
    pub fn new() -> Self {
        Self::load_from_file("config.yml")
            .or_else(|_| Self::load_from_file("../config.yml"))
            .unwrap_or_else(|_| Self::from_yaml(YamlConfig::default()))
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return Some(env_val);
                }
            }
        }
        // Explicit env_key as fallback
        if let Ok(env_val) = std::env::var(env_key) {
            if !env_val.is_empty() {
                return Some(env_val);
            }
        }
        value.filter(|v| !(v.starts_with("${") && v.ends_with('}')))
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        let config = Self::from_yaml(yaml);
        config.validate()?;
        Ok(config)
    }

    fn from_yaml(yaml: YamlConfig) -> Self {
        let openai = yaml.openai.unwrap_or_default();
        let models = yaml.models.unwrap_or_default();
        let ollama = yaml.ollama.unwrap_or_default();
        let rag = yaml.rag.unwrap_or_default();
        let answer = yaml.answer.unwrap_or_default();
        let extraction = yaml.extraction.unwrap_or_default();
        let retry = yaml.retry.unwrap_or_default();
        let storage = yaml.storage.unwrap_or_default();
        let neo4j = yaml.neo4j.unwrap_or_default();

        let provider = Self::resolve_env_string(models.provider, "RAG_PROVIDER")
            .and_then(|p| p.parse().ok())
            .unwrap_or(ProviderKind::OpenAi);

        let neo4j = match (
            Self::resolve_env_string(neo4j.uri, "NEO4J_URI"),
            Self::resolve_env_string(neo4j.user, "NEO4J_USER"),
            Self::resolve_env_string(neo4j.password, "NEO4J_PASSWORD"),
        ) {
            (Some(uri), user, password) => Some(Neo4jSettings {
                uri,
                user: user.unwrap_or_else(|| "neo4j".to_string()),
                password: password.unwrap_or_default(),
            }),
            _ => None,
        };

        let defaults = RagSettings::default();
        let retry_defaults = RetrySettings::default();

        Self {
            openai_api_key: Self::resolve_env_string(openai.api_key, "OPENAI_API_KEY"),
            openai_api_url: Self::resolve_env_string(openai.api_url, "OPENAI_API_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            openai_timeout_secs: openai.timeout_secs.unwrap_or(60),
            provider,
            chat_model: Self::resolve_env_string(models.chat, "RAG_CHAT_MODEL")
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            embedding_model: Self::resolve_env_string(models.embedding, "RAG_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimensions: models.embedding_dimensions,
            ollama_url: Self::resolve_env_string(ollama.url, "OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            rag: RagSettings {
                chunk_size: rag.chunk_size.unwrap_or(defaults.chunk_size),
                chunk_overlap: rag.chunk_overlap.unwrap_or(defaults.chunk_overlap),
                max_context_chunks: rag
                    .max_context_chunks
                    .unwrap_or(defaults.max_context_chunks),
                similarity_threshold: rag
                    .similarity_threshold
                    .unwrap_or(defaults.similarity_threshold),
                entity_limit: rag.entity_limit.unwrap_or(defaults.entity_limit),
                summary_chars: rag.summary_chars.unwrap_or(defaults.summary_chars),
                concurrency: rag.concurrency.unwrap_or(defaults.concurrency).max(1),
            },
            answer_language: Self::resolve_env_string(answer.language, "RAG_ANSWER_LANGUAGE")
                .unwrap_or_else(|| "English".to_string()),
            answer: CompletionSettings {
                temperature: answer.temperature.unwrap_or(0.3),
                max_tokens: answer.max_tokens.unwrap_or(1000),
            },
            extraction: CompletionSettings {
                temperature: extraction.temperature.unwrap_or(0.1),
                max_tokens: extraction.max_tokens.unwrap_or(1000),
            },
            retry: RetrySettings {
                max_retries: retry.max_retries.unwrap_or(retry_defaults.max_retries),
                base_delay_ms: retry.base_delay_ms.unwrap_or(retry_defaults.base_delay_ms),
            },
            upload_dir: Self::resolve_env_string(storage.upload_dir, "RAG_UPLOAD_DIR")
                .unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string())
                .into(),
            neo4j,
        }
    }

    /// Config with built-in defaults only, ignoring files and environment
    pub fn defaults() -> Self {
        Self {
            openai_api_key: None,
            openai_api_url: DEFAULT_OPENAI_URL.to_string(),
            openai_timeout_secs: 60,
            provider: ProviderKind::OpenAi,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimensions: None,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            rag: RagSettings::default(),
            answer_language: "English".to_string(),
            answer: CompletionSettings {
                temperature: 0.3,
                max_tokens: 1000,
            },
            extraction: CompletionSettings {
                temperature: 0.1,
                max_tokens: 1000,
            },
            retry: RetrySettings::default(),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            neo4j: None,
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.rag.chunk_size == 0 {
            return Err(Error::Config("rag.chunk_size must be > 0".into()));
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(Error::Config(format!(
                "rag.chunk_overlap ({}) must be smaller than rag.chunk_size ({})",
                self.rag.chunk_overlap, self.rag.chunk_size
            )));
        }
        if !(-1.0..=1.0).contains(&self.rag.similarity_threshold) {
            return Err(Error::Config(format!(
                "rag.similarity_threshold must be within [-1, 1], got {}",
                self.rag.similarity_threshold
            )));
        }
        if self.rag.max_context_chunks == 0 {
            return Err(Error::Config("rag.max_context_chunks must be > 0".into()));
        }
        Ok(())
    }
}
