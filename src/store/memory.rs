//! In-process graph store.
//!
//! Used when no Neo4j connection is configured and by the test suite. All
//! state lives behind one `RwLock`, so every trait call is atomic.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{GraphStore, StoreStats};
use crate::integrations::local::cosine_similarity;
use crate::models::{
    normalize_name, Document, DocumentChunk, Entity, EntityRelation, IdentityKey, QueryHistory,
    Scored,
};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    documents: HashMap<Uuid, Document>,
    chunks: HashMap<Uuid, DocumentChunk>,
    entities: HashMap<Uuid, Entity>,
    identities: HashMap<IdentityKey, Uuid>,
    /// (chunk id, entity id) in link order
    mentions: Vec<(Uuid, Uuid)>,
    mention_set: HashSet<(Uuid, Uuid)>,
    relations: Vec<EntityRelation>,
    history: Vec<QueryHistory>,
}

impl Inner {
    fn entities_sorted(&self, mut entities: Vec<Entity>) -> Vec<Entity> {
        entities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        entities
    }
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    inner: RwLock<Inner>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_score_desc<T>(a: &Scored<T>, b: &Scored<T>) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn save_document(&self, document: &Document) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.inner.read().await.documents.get(&id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let inner = self.inner.read().await;
        let mut docs: Vec<Document> = inner.documents.values().cloned().collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(docs)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.documents.remove(&id).is_none() {
            return Ok(false);
        }

        let chunk_ids: HashSet<Uuid> = inner
            .chunks
            .values()
            .filter(|c| c.document_id == id)
            .map(|c| c.id)
            .collect();
        inner.chunks.retain(|chunk_id, _| !chunk_ids.contains(chunk_id));
        inner.mentions.retain(|(chunk_id, _)| !chunk_ids.contains(chunk_id));
        inner
            .mention_set
            .retain(|(chunk_id, _)| !chunk_ids.contains(chunk_id));
        Ok(true)
    }

    async fn save_chunks(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let mut inner = self.inner.write().await;
        for chunk in chunks {
            if !inner.documents.contains_key(&chunk.document_id) {
                return Err(Error::Store(format!(
                    "chunk {} references unknown document {}",
                    chunk.id, chunk.document_id
                )));
            }
        }
        for chunk in chunks {
            inner.chunks.insert(chunk.id, chunk.clone());
        }
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<DocumentChunk>> {
        let inner = self.inner.read().await;
        let mut chunks: Vec<DocumentChunk> = inner
            .chunks
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn similarity_search_chunks(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<DocumentChunk>>> {
        let inner = self.inner.read().await;
        let mut scored: Vec<Scored<DocumentChunk>> = inner
            .chunks
            .values()
            .filter_map(|c| {
                let embedding = c.embedding.as_deref().filter(|e| e.len() == query.len())?;
                Some(Scored::new(c.clone(), cosine_similarity(query, embedding)))
            })
            .collect();
        scored.sort_by(|a, b| {
            by_score_desc(a, b)
                .then(a.item.document_id.cmp(&b.item.document_id))
                .then(a.item.chunk_index.cmp(&b.item.chunk_index))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn link_chunk_entity(&self, chunk_id: Uuid, entity_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.chunks.contains_key(&chunk_id) {
            return Err(Error::Store(format!("unknown chunk {}", chunk_id)));
        }
        if !inner.entities.contains_key(&entity_id) {
            return Err(Error::Store(format!("unknown entity {}", entity_id)));
        }
        if inner.mention_set.insert((chunk_id, entity_id)) {
            inner.mentions.push((chunk_id, entity_id));
        }
        Ok(())
    }

    async fn entities_for_chunk(&self, chunk_id: Uuid) -> Result<Vec<Entity>> {
        let inner = self.inner.read().await;
        Ok(inner
            .mentions
            .iter()
            .filter(|(c, _)| *c == chunk_id)
            .filter_map(|(_, e)| inner.entities.get(e).cloned())
            .collect())
    }

    async fn chunks_for_entity(&self, entity_id: Uuid) -> Result<Vec<DocumentChunk>> {
        let inner = self.inner.read().await;
        Ok(inner
            .mentions
            .iter()
            .filter(|(_, e)| *e == entity_id)
            .filter_map(|(c, _)| inner.chunks.get(c).cloned())
            .collect())
    }

    async fn find_entity(&self, key: &IdentityKey) -> Result<Option<Entity>> {
        let inner = self.inner.read().await;
        Ok(inner
            .identities
            .get(key)
            .and_then(|id| inner.entities.get(id))
            .cloned())
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity> {
        let mut inner = self.inner.write().await;
        let key = entity.identity_key();

        if let Some(existing_id) = inner.identities.get(&key).copied() {
            if let Some(existing) = inner.entities.get_mut(&existing_id) {
                existing.description = entity.description.clone();
                existing.embedding = entity.embedding.clone();
                return Ok(existing.clone());
            }
        }

        inner.identities.insert(key, entity.id);
        inner.entities.insert(entity.id, entity.clone());
        Ok(entity.clone())
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
        Ok(self.inner.read().await.entities.get(&id).cloned())
    }

    async fn find_entities_by_name(&self, name: &str) -> Result<Vec<Entity>> {
        let inner = self.inner.read().await;
        let wanted = normalize_name(name);
        let matches = inner
            .entities
            .values()
            .filter(|e| normalize_name(&e.name) == wanted)
            .cloned()
            .collect();
        Ok(inner.entities_sorted(matches))
    }

    async fn similarity_search_entities(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<Entity>>> {
        let inner = self.inner.read().await;
        let mut scored: Vec<Scored<Entity>> = inner
            .entities
            .values()
            .filter_map(|e| {
                let embedding = e.embedding.as_deref().filter(|v| v.len() == query.len())?;
                Some(Scored::new(e.clone(), cosine_similarity(query, embedding)))
            })
            .collect();
        scored.sort_by(|a, b| by_score_desc(a, b).then(a.item.id.cmp(&b.item.id)));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn keyword_search_entities(&self, keyword: &str, limit: usize) -> Result<Vec<Entity>> {
        let inner = self.inner.read().await;
        let needle = keyword.to_lowercase();
        let matches = inner
            .entities
            .values()
            .filter(|e| e.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        let mut sorted = inner.entities_sorted(matches);
        sorted.truncate(limit);
        Ok(sorted)
    }

    async fn add_relation(&self, relation: &EntityRelation) -> Result<bool> {
        let mut inner = self.inner.write().await;
        for endpoint in [relation.source_id, relation.target_id] {
            if !inner.entities.contains_key(&endpoint) {
                return Err(Error::Store(format!(
                    "relation endpoint {} does not exist",
                    endpoint
                )));
            }
        }

        let key = relation.dedup_key();
        if inner.relations.iter().any(|r| r.dedup_key() == key) {
            return Ok(false);
        }
        inner.relations.push(relation.clone());
        Ok(true)
    }

    async fn relations_from(&self, entity_id: Uuid) -> Result<Vec<EntityRelation>> {
        let inner = self.inner.read().await;
        let mut relations: Vec<EntityRelation> = inner
            .relations
            .iter()
            .filter(|r| r.source_id == entity_id)
            .cloned()
            .collect();
        relations.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(Ordering::Equal));
        Ok(relations)
    }

    async fn append_history(&self, record: &QueryHistory) -> Result<()> {
        self.inner.write().await.history.push(record.clone());
        Ok(())
    }

    async fn set_feedback(&self, history_id: Uuid, label: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .history
            .iter_mut()
            .find(|h| h.id == history_id)
            .ok_or_else(|| Error::NotFound(format!("query history {}", history_id)))?;
        record.user_feedback = Some(label.to_string());
        Ok(())
    }

    async fn history_for_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<QueryHistory>> {
        let inner = self.inner.read().await;
        Ok(inner
            .history
            .iter()
            .rev()
            .filter(|h| h.session_id == session_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn all_history(&self) -> Result<Vec<QueryHistory>> {
        Ok(self.inner.read().await.history.clone())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner.read().await;
        let mut stats = StoreStats {
            documents: inner.documents.len(),
            chunks: inner.chunks.len(),
            entities: inner.entities.len(),
            relations: inner.relations.len(),
            queries: inner.history.len(),
            ..Default::default()
        };
        for entity in inner.entities.values() {
            *stats
                .entity_types
                .entry(entity.entity_type.to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }
}
