//! LLM-based entity and relation extraction.
//!
//! Completions are untrusted: the payload is located with a balanced-brace
//! scan, decoded into a loose wire shape and then validated into
//! [`Extraction`]. Anything that does not survive validation is dropped.

use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::CompletionSettings;
use crate::integrations::{ChatMessage, CompletionProvider, RetryPolicy};
use crate::metrics::{self, DegradedStep};
use crate::models::EntityType;
use crate::prompts::{render_extraction, Prompt};

/// Label used when the model omits the relationship type.
pub const DEFAULT_RELATIONSHIP: &str = "RELATED_TO";

/// Validated entity mention.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
}

/// Validated relation between two entity names.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    pub relationship: String,
    pub description: String,
}

/// Result of extracting one chunk. Empty on any failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Wire shape as the model returns it; every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    #[serde(default)]
    pub relations: Vec<RawRelation>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawEntity {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawRelation {
    pub source: Option<String>,
    pub target: Option<String>,
    pub relationship: Option<String>,
    pub description: Option<String>,
}

impl ExtractionPayload {
    /// Drop entries with missing names or unknown entity types.
    pub fn validate(self) -> Extraction {
        let entities = self
            .entities
            .into_iter()
            .filter_map(|raw| {
                let name = raw.name.as_deref().map(str::trim).unwrap_or_default();
                if name.is_empty() {
                    return None;
                }
                let entity_type = match raw.entity_type.as_deref().map(EntityType::from_str) {
                    Some(Ok(t)) => t,
                    _ => {
                        debug!(name, kind = ?raw.entity_type, "Dropping entity with unknown type");
                        return None;
                    }
                };
                Some(ExtractedEntity {
                    name: name.to_string(),
                    entity_type,
                    description: raw.description.unwrap_or_default().trim().to_string(),
                })
            })
            .collect();

        let relations = self
            .relations
            .into_iter()
            .filter_map(|raw| {
                let source = raw.source?.trim().to_string();
                let target = raw.target?.trim().to_string();
                if source.is_empty() || target.is_empty() {
                    return None;
                }
                let relationship = raw
                    .relationship
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| DEFAULT_RELATIONSHIP.to_string());
                Some(ExtractedRelation {
                    source,
                    target,
                    relationship,
                    description: raw.description.unwrap_or_default().trim().to_string(),
                })
            })
            .collect();

        Extraction {
            entities,
            relations,
        }
    }
}

/// Byte ranges of every top-level balanced `{...}` in `text`.
///
/// Braces inside JSON strings (including escaped quotes) are ignored.
/// Unterminated objects are not reported.
pub fn find_json_objects(text: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        objects.push(&text[s..=idx]);
                    }
                }
            }
            _ => {}
        }
    }

    objects
}

/// First balanced object that looks like an extraction payload.
pub fn parse_extraction(text: &str) -> Option<ExtractionPayload> {
    find_json_objects(text).into_iter().find_map(|candidate| {
        let value: serde_json::Value = serde_json::from_str(candidate).ok()?;
        let object = value.as_object()?;
        if !object.contains_key("entities") && !object.contains_key("relations") {
            return None;
        }
        serde_json::from_value(value).ok()
    })
}

/// Prompts the completion provider once per chunk.
#[derive(Clone)]
pub struct EntityExtractor {
    provider: Option<Arc<dyn CompletionProvider>>,
    model: String,
    settings: CompletionSettings,
    retry: RetryPolicy,
    template: String,
}

impl EntityExtractor {
    pub fn new(
        provider: Option<Arc<dyn CompletionProvider>>,
        model: impl Into<String>,
        settings: CompletionSettings,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            settings,
            retry: RetryPolicy::default(),
            template: Prompt::EntityExtraction.load(),
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

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Extract entities and relations; never fails.
    pub async fn extract(&self, chunk_text: &str) -> Extraction {
        let Some(provider) = self.provider.as_ref() else {
            return Extraction::default();
        };
        if chunk_text.trim().is_empty() {
            return Extraction::default();
        }

        let messages = vec![ChatMessage::user(render_extraction(&self.template, chunk_text))];
        let model = self.model.as_str();
        let (temperature, max_tokens) = (self.settings.temperature, self.settings.max_tokens);

        let response = match self
            .retry
            .run("extract", || {
                provider.complete(model, &messages, temperature, max_tokens)
            })
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(model, "Entity extraction call failed: {}", err);
                metrics::record_degraded(DegradedStep::Extraction);
                return Extraction::default();
            }
        };

        match parse_extraction(&response) {
            Some(payload) => {
                let extraction = payload.validate();
                debug!(
                    entities = extraction.entities.len(),
                    relations = extraction.relations.len(),
                    "Extracted chunk"
                );
                extraction
            }
            None => {
                warn!(
                    response_len = response.len(),
                    "No extraction payload found in completion"
                );
                metrics::record_degraded(DegradedStep::Extraction);
                Extraction::default()
            }
        }
    }
}
