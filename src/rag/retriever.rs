//! Hybrid retrieval: vector search over chunks plus vector and keyword
//! search over entities.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::embedder::ChunkEmbedder;
use crate::models::{DocumentChunk, Entity, Scored};
use crate::store::GraphStore;
use crate::Result;

/// Question tokens shorter than this are not used for keyword search.
const MIN_KEYWORD_CHARS: usize = 3;

/// Context assembled for one question.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    /// Store ranking, best first, all at or above the threshold
    pub chunks: Vec<Scored<DocumentChunk>>,
    /// Deduplicated by id; order carries no ranking
    pub entities: Vec<Entity>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.entities.is_empty()
    }

    pub fn chunk_ids(&self) -> Vec<uuid::Uuid> {
        self.chunks.iter().map(|c| c.item.id).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    pub max_context_chunks: usize,
    pub similarity_threshold: f32,
    /// Split evenly between the vector and keyword paths
    pub entity_limit: usize,
}

pub struct RetrievalEngine {
    store: Arc<dyn GraphStore>,
    embedder: ChunkEmbedder,
    settings: RetrievalSettings,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn GraphStore>, embedder: ChunkEmbedder, settings: RetrievalSettings) -> Self {
        Self {
            store,
            embedder,
            settings,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Retrieve chunks and entities for `question`.
    ///
    /// Without a question embedding only the keyword path contributes.
    pub async fn retrieve(&self, question: &str) -> Result<RetrievedContext> {
        let query_vector = self.embedder.embed_text(question).await;
        if query_vector.is_none() {
            warn!("No question embedding, falling back to keyword search only");
        }
        let per_path = (self.settings.entity_limit / 2).max(1);

        let (chunks, vector_entities, keyword_entities) = tokio::join!(
            self.similar_chunks(query_vector.as_deref()),
            self.similar_entities(query_vector.as_deref(), per_path),
            self.keyword_entities(question, per_path),
        );

        let mut seen = HashSet::new();
        let entities = vector_entities?
            .into_iter()
            .chain(keyword_entities?)
            .filter(|e| seen.insert(e.id))
            .collect::<Vec<_>>();
        let chunks = chunks?;

        debug!(
            chunks = chunks.len(),
            entities = entities.len(),
            "Retrieved context"
        );
        Ok(RetrievedContext { chunks, entities })
    }

    async fn similar_chunks(&self, query: Option<&[f32]>) -> Result<Vec<Scored<DocumentChunk>>> {
        let Some(query) = query else {
            return Ok(Vec::new());
        };
        let threshold = self.settings.similarity_threshold;

        let mut hits = self
            .store
            .similarity_search_chunks(query, self.settings.max_context_chunks)
            .await?;
        hits.retain(|hit| hit.score >= threshold);
        hits.truncate(self.settings.max_context_chunks);
        Ok(hits)
    }

    async fn similar_entities(&self, query: Option<&[f32]>, limit: usize) -> Result<Vec<Entity>> {
        let Some(query) = query else {
            return Ok(Vec::new());
        };
        Ok(self
            .store
            .similarity_search_entities(query, limit)
            .await?
            .into_iter()
            .map(|hit| hit.item)
            .collect())
    }

    async fn keyword_entities(&self, question: &str, limit: usize) -> Result<Vec<Entity>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for keyword in keywords(question) {
            for entity in self.store.keyword_search_entities(&keyword, limit).await? {
                if seen.insert(entity.id) {
                    found.push(entity);
                }
            }
            if found.len() >= limit {
                break;
            }
        }

        found.truncate(limit);
        Ok(found)
    }
}

/// Distinct lowercase question tokens longer than two characters.
pub fn keywords(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    question
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .filter(|token| token.chars().count() >= MIN_KEYWORD_CHARS)
        .map(str::to_lowercase)
        .filter(|token| seen.insert(token.clone()))
        .collect()
}
