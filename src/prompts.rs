//! Prompt templates for extraction and grounded answering.
//!
//! Built-in templates can be overridden by Markdown files in the `prompts/`
//! directory at the project root.

use std::path::PathBuf;

use crate::models::EntityType;
use crate::{Error, Result};

/// Answer returned when a query cannot be completed.
pub const APOLOGY_ANSWER: &str =
    "Sorry, an error occurred while processing your question. Please try again later.";

const EXTRACTION_TEMPLATE: &str = r#"Analyze the following text and extract the important entities and the relations between them.

Entity types: {entity_types}

Return the result as strict JSON with exactly this shape:
{
  "entities": [
    {"name": "entity name", "type": "ENTITY_TYPE", "description": "short description"}
  ],
  "relations": [
    {"source": "source entity name", "target": "target entity name", "relationship": "relation type", "description": "relation description"}
  ]
}

Text:
{text}"#;

const ANSWER_TEMPLATE: &str = r#"You are an assistant that answers questions using only the supplied context.
Answer in {language}.
If the context does not contain enough information to answer, say so explicitly.
Do not invent facts that are not present in the context.

Context:
{context}

Related entities:
{entities}"#;

/// Available prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Entity and relation extraction from one chunk.
    EntityExtraction,
    /// System prompt for answering from retrieved context.
    GroundedAnswer,
}

impl Prompt {
    /// Override file name (Markdown).
    pub fn filename(&self) -> &'static str {
        match self {
            Prompt::EntityExtraction => "entity_extraction.md",
            Prompt::GroundedAnswer => "grounded_answer.md",
        }
    }

    pub fn builtin(&self) -> &'static str {
        match self {
            Prompt::EntityExtraction => EXTRACTION_TEMPLATE,
            Prompt::GroundedAnswer => ANSWER_TEMPLATE,
        }
    }

    /// Load the override file, falling back to the built-in template.
    pub fn load(&self) -> String {
        match load_prompt(self.filename()) {
            Ok(template) if !template.trim().is_empty() => template,
            _ => self.builtin().to_string(),
        }
    }
}

/// Load a prompt by file name.
pub fn load_prompt(filename: &str) -> Result<String> {
    let path = prompts_dir().join(filename);
    std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidArgument(format!("Failed to load prompt {}: {}", filename, e))
    })
}

/// Path to the prompts directory.
pub fn prompts_dir() -> PathBuf {
    let candidates = [PathBuf::from("prompts"), PathBuf::from("../prompts")];

    for path in candidates {
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("prompts")
}

/// Comma-separated list of the recognized entity labels.
pub fn entity_type_list() -> String {
    EntityType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fill the extraction template with one chunk's text.
pub fn render_extraction(template: &str, text: &str) -> String {
    let entity_types = entity_type_list();
    fill_template(template, &[("{entity_types}", &entity_types), ("{text}", text)])
}

/// Fill the answer template with rendered context and entity blocks.
pub fn render_answer(template: &str, language: &str, context: &str, entities: &str) -> String {
    fill_template(
        template,
        &[
            ("{language}", language),
            ("{context}", context),
            ("{entities}", entities),
        ],
    )
}

/// Substitute placeholders in one pass over the template.
///
/// Substituted values are never scanned again, so placeholder-like text
/// inside a value is kept verbatim.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
