//! Grounded answer generation.

use std::sync::Arc;

use tracing::debug;

use super::retriever::RetrievedContext;
use crate::config::CompletionSettings;
use crate::integrations::{ChatMessage, CompletionProvider, RetryPolicy};
use crate::models::{DocumentChunk, Entity, Scored};
use crate::prompts::{render_answer, Prompt};
use crate::{Error, Result};

/// Model answer plus exactly the evidence that was placed in the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub used_chunks: Vec<Scored<DocumentChunk>>,
    pub used_entities: Vec<Entity>,
}

/// `chunk {index}: {content}` blocks separated by blank lines.
pub fn render_chunks(chunks: &[Scored<DocumentChunk>]) -> String {
    chunks
        .iter()
        .map(|c| format!("chunk {}: {}", c.item.chunk_index, c.item.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `- name (TYPE): description` lines.
pub fn render_entities(entities: &[Entity]) -> String {
    entities
        .iter()
        .map(|e| format!("- {} ({}): {}", e.name, e.entity_type, e.description))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct AnswerGenerator {
    provider: Option<Arc<dyn CompletionProvider>>,
    model: String,
    language: String,
    settings: CompletionSettings,
    retry: RetryPolicy,
    template: String,
}

impl AnswerGenerator {
    pub fn new(
        provider: Option<Arc<dyn CompletionProvider>>,
        model: impl Into<String>,
        language: impl Into<String>,
        settings: CompletionSettings,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            language: language.into(),
            settings,
            retry: RetryPolicy::default(),
            template: Prompt::GroundedAnswer.load(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// System prompt for the given context.
    pub fn system_prompt(&self, context: &RetrievedContext) -> String {
        render_answer(
            &self.template,
            &self.language,
            &render_chunks(&context.chunks),
            &render_entities(&context.entities),
        )
    }

    /// One completion call; the context is consumed into the answer unchanged.
    pub async fn generate(&self, question: &str, context: RetrievedContext) -> Result<Answer> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| Error::Config("no completion provider configured".to_string()))?;

        let messages = vec![
            ChatMessage::system(self.system_prompt(&context)),
            ChatMessage::user(question),
        ];
        let model = self.model.as_str();
        let (temperature, max_tokens) = (self.settings.temperature, self.settings.max_tokens);

        let text = self
            .retry
            .run("answer", || {
                provider.complete(model, &messages, temperature, max_tokens)
            })
            .await?;

        debug!(
            chunks = context.chunks.len(),
            entities = context.entities.len(),
            answer_len = text.len(),
            "Generated answer"
        );

        Ok(Answer {
            text: text.trim().to_string(),
            used_chunks: context.chunks,
            used_entities: context.entities,
        })
    }
}
