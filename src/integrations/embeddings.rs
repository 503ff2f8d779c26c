//! Embedding generation service using OpenAI

use async_openai::{
    config::OpenAIConfig,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client as AsyncOpenAIClient,
};
use async_trait::async_trait;
use tracing::debug;

use super::EmbeddingProvider;
use crate::config::DEFAULT_OPENAI_URL;
use crate::{Error, Result};

/// Longest input sent to the API, in characters
const MAX_INPUT_CHARS: usize = 8000;

/// Service for generating text embeddings
pub struct EmbeddingService {
    client: AsyncOpenAIClient<OpenAIConfig>,
}

impl EmbeddingService {
    /// Create a new embedding service
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_OPENAI_URL)
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY not set".to_string()))?;
        Self::new(api_key)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("OPENAI_API_KEY is empty".to_string()));
        }

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url.into());

        Ok(Self {
            client: AsyncOpenAIClient::with_config(config),
        })
    }

    /// Generate embeddings for multiple texts in batch.
    ///
    /// Blank inputs are not sent and come back as empty vectors, so the
    /// output always lines up with `texts`.
    pub async fn embed_batch(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let processed: Vec<String> = texts
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| t.chars().take(MAX_INPUT_CHARS).collect())
            .collect();

        if processed.is_empty() {
            return Ok(vec![Vec::new(); texts.len()]);
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .input(EmbeddingInput::StringArray(processed))
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        debug!(
            model,
            count = response.data.len(),
            tokens = response.usage.total_tokens,
            "Generated embeddings"
        );

        let mut data = response.data;
        data.sort_by_key(|e| e.index);

        // Map back to original positions (blank texts get empty vectors)
        let mut result = Vec::with_capacity(texts.len());
        let mut embed_iter = data.into_iter();

        for text in texts {
            if text.trim().is_empty() {
                result.push(Vec::new());
            } else if let Some(embed) = embed_iter.next() {
                result.push(embed.embedding);
            }
        }

        Ok(result)
    }
}

/// Known output dimension for OpenAI embedding models
pub fn model_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(model, texts).await
    }
}
