//! External integrations module.
//!
//! The pipeline only talks to its leaves through the narrow traits below:
//! - [`EmbeddingProvider`]: text(s) to vector(s)
//! - [`CompletionProvider`]: role-tagged messages to generated text
//! - [`text::TextExtractor`]: raw bytes plus MIME type to plain text
//!
//! Provides clients for:
//! - OpenAI (chat via reqwest, embeddings via async-openai)
//! - Ollama (local chat and embeddings)
//! - Hashed bag-of-words embeddings for offline use

pub mod embeddings;
pub mod local;
pub mod ollama;
pub mod openai;
pub mod retry;
pub mod text;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use embeddings::EmbeddingService;
pub use local::HashEmbedder;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;
pub use retry::RetryPolicy;
pub use text::{detect_mime, PlainTextExtractor, TextExtractor};

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Computes embedding vectors.
///
/// Returns one vector per input on success. Implementations may return fewer
/// vectors than inputs when the backend partially fails; callers must check.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Generates text from a conversation.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// Map a non-success HTTP status to an error.
///
/// 429 and 5xx are transient (`Provider`), other client errors are not.
pub(crate) fn status_error(service: &str, status: StatusCode, body: &str) -> Error {
    let msg = format!("{} error {}: {}", service, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::Provider(msg)
    } else {
        Error::InvalidArgument(msg)
    }
}
