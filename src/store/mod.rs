//! Graph persistence.
//!
//! The store is the single owner of every relationship: document to chunk,
//! chunk to entity and entity to entity. Reverse views (which chunks mention
//! an entity, which entities a document mentions) are derived by query.

pub mod memory;
pub mod neo4j;

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Document, DocumentChunk, Entity, EntityRelation, IdentityKey, QueryHistory, Scored,
};
use crate::Result;

pub use memory::InMemoryGraphStore;
pub use neo4j::Neo4jGraphStore;

/// Node counts for the `stats` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub documents: usize,
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
    pub queries: usize,
    /// Entity count per type label
    pub entity_types: BTreeMap<String, usize>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    // Documents

    async fn save_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Newest first.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Remove the document, its chunks and their entity links. Entities stay.
    /// Returns false when the document did not exist.
    async fn delete_document(&self, id: Uuid) -> Result<bool>;

    // Chunks

    /// Upsert chunks by id and attach them to their document.
    async fn save_chunks(&self, chunks: &[DocumentChunk]) -> Result<()>;

    /// Ordered by chunk index.
    async fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<DocumentChunk>>;

    /// Chunks with embeddings ranked by cosine similarity, best first.
    async fn similarity_search_chunks(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<DocumentChunk>>>;

    async fn link_chunk_entity(&self, chunk_id: Uuid, entity_id: Uuid) -> Result<()>;

    async fn entities_for_chunk(&self, chunk_id: Uuid) -> Result<Vec<Entity>>;

    async fn chunks_for_entity(&self, entity_id: Uuid) -> Result<Vec<DocumentChunk>>;

    // Entities

    async fn find_entity(&self, key: &IdentityKey) -> Result<Option<Entity>>;

    /// Insert or update by identity key and return the stored entity.
    ///
    /// When an entity with the same key exists, its id, name and creation time
    /// are kept and description/embedding are overwritten.
    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity>;

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>>;

    /// Entities whose normalized name equals `name` normalized, oldest first.
    async fn find_entities_by_name(&self, name: &str) -> Result<Vec<Entity>>;

    async fn similarity_search_entities(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<Entity>>>;

    /// Case-insensitive substring match on entity names, oldest first.
    async fn keyword_search_entities(&self, keyword: &str, limit: usize) -> Result<Vec<Entity>>;

    // Relations

    /// Insert unless an edge with the same dedup key exists. Returns true on insert.
    async fn add_relation(&self, relation: &EntityRelation) -> Result<bool>;

    /// Outgoing relations, strongest first.
    async fn relations_from(&self, entity_id: Uuid) -> Result<Vec<EntityRelation>>;

    // Query history

    async fn append_history(&self, record: &QueryHistory) -> Result<()>;

    /// Fails with `NotFound` for unknown ids.
    async fn set_feedback(&self, history_id: Uuid, label: &str) -> Result<()>;

    /// Newest first.
    async fn history_for_session(&self, session_id: &str, limit: usize)
        -> Result<Vec<QueryHistory>>;

    async fn all_history(&self) -> Result<Vec<QueryHistory>>;

    async fn stats(&self) -> Result<StoreStats>;

    /// Distinct entities mentioned by any chunk of the document.
    async fn entities_for_document(&self, document_id: Uuid) -> Result<Vec<Entity>> {
        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for chunk in self.chunks_for_document(document_id).await? {
            for entity in self.entities_for_chunk(chunk.id).await? {
                if seen.insert(entity.id) {
                    entities.push(entity);
                }
            }
        }
        Ok(entities)
    }
}
