//! Data models for documents, chunks, entities and query history

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Lifecycle of an ingested document.
///
/// `Uploaded -> Processing -> {Processed, Error}`. `Error` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "UPLOADED",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Processed => "PROCESSED",
            DocumentStatus::Error => "ERROR",
        }
    }

    /// Whether `self -> next` moves the lifecycle forward.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Uploaded, Processing) | (Uploaded, Error) | (Processing, Processed) | (Processing, Error)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Processed | DocumentStatus::Error)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UPLOADED" => Ok(DocumentStatus::Uploaded),
            "PROCESSING" => Ok(DocumentStatus::Processing),
            "PROCESSED" => Ok(DocumentStatus::Processed),
            "ERROR" => Ok(DocumentStatus::Error),
            other => Err(Error::InvalidArgument(format!(
                "unknown document status: {}",
                other
            ))),
        }
    }
}

/// Uploaded document and its processing state.
///
/// Chunks are not embedded here; the store owns the document/chunk edge and
/// they are fetched with `GraphStore::chunks_for_document`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    pub file_path: String,
    pub status: DocumentStatus,
    /// Truncated preview of the extracted text
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        file_size: u64,
        file_path: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        Self {
            id: Uuid::new_v4(),
            title: title_from_filename(&filename),
            filename,
            content_type: content_type.into(),
            file_size,
            file_path: file_path.into(),
            status: DocumentStatus::Uploaded,
            summary: None,
            created_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting backward or post-terminal transitions.
    pub fn advance(&mut self, next: DocumentStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Title is the filename without its last extension.
pub fn title_from_filename(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename[..idx].to_string(),
        _ => filename.to_string(),
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn summarize(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Cheap token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// A bounded segment of a document; content is immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Zero-based, contiguous within the document
    pub chunk_index: usize,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    pub fn new(document_id: Uuid, chunk_index: usize, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4(),
            document_id,
            chunk_index,
            token_count: estimate_tokens(&content),
            content,
            embedding: None,
            created_at: Utc::now(),
        }
    }
}

/// Recognized entity categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Concept,
    Product,
    Event,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Location,
        EntityType::Concept,
        EntityType::Product,
        EntityType::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Organization => "ORGANIZATION",
            EntityType::Location => "LOCATION",
            EntityType::Concept => "CONCEPT",
            EntityType::Product => "PRODUCT",
            EntityType::Event => "EVENT",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown entity type: {}", s)))
    }
}

/// Canonical form of an entity name used for identity and lookups.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Global identity of an entity: normalized name plus type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub name_key: String,
    pub entity_type: EntityType,
}

impl IdentityKey {
    pub fn new(name: &str, entity_type: EntityType) -> Self {
        Self {
            name_key: normalize_name(name),
            entity_type,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.name_key)
    }
}

/// Knowledge graph node shared across all documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    /// First-seen surface form
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: EntityType, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into().trim().to_string(),
            entity_type,
            description: description.into(),
            embedding: None,
            created_at: Utc::now(),
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.name, self.entity_type)
    }

    /// Text the entity embedding is computed from.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.name, self.description)
    }
}

/// Directed, typed edge owned by its source entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelation {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relationship_type: String,
    /// Always within `[0, 1]`
    pub strength: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl EntityRelation {
    pub fn new(
        source_id: Uuid,
        target_id: Uuid,
        relationship_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            target_id,
            relationship_type: relationship_type.into().trim().to_string(),
            strength: 1.0,
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength.clamp(0.0, 1.0);
        self
    }

    /// Relations with the same source, target and label are the same edge.
    pub fn dedup_key(&self) -> (Uuid, Uuid, String) {
        (
            self.source_id,
            self.target_id,
            normalize_name(&self.relationship_type),
        )
    }
}

/// One answered (or fallen-back) question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHistory {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    /// Chunk ids placed in the prompt, in prompt order
    pub context_chunk_ids: Vec<Uuid>,
    pub response_time_ms: u64,
    pub user_feedback: Option<String>,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// Chunk or entity paired with a similarity score from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

impl<T> Scored<T> {
    pub fn new(item: T, score: f32) -> Self {
        Self { item, score }
    }
}
