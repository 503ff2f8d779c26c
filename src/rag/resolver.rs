//! Merges extracted mentions into the shared entity graph.
//!
//! Every find-or-create for one identity key runs inside that key's critical
//! section, so concurrent ingestions never create the same entity twice.

use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::embedder::ChunkEmbedder;
use super::entity_extractor::{ExtractedEntity, ExtractedRelation};
use crate::models::{Entity, EntityRelation, IdentityKey};
use crate::store::GraphStore;
use crate::Result;

/// Lock table keyed by entity identity.
#[derive(Default)]
pub struct KeyedLocks {
    table: Mutex<HashMap<IdentityKey, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &IdentityKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
            table.entry(key.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Forget keys nobody holds or waits on.
    pub fn prune(&self) {
        let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
        table.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters for one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub entities_created: usize,
    /// Existing entities that got a description or embedding
    pub entities_updated: usize,
    pub entities_unchanged: usize,
    pub relations_created: usize,
    /// Relation already present between the same pair with the same label
    pub relations_skipped: usize,
    /// An endpoint name matched no entity
    pub relations_unresolved: usize,
}

impl AddAssign for ResolutionStats {
    fn add_assign(&mut self, other: Self) {
        self.entities_created += other.entities_created;
        self.entities_updated += other.entities_updated;
        self.entities_unchanged += other.entities_unchanged;
        self.relations_created += other.relations_created;
        self.relations_skipped += other.relations_skipped;
        self.relations_unresolved += other.relations_unresolved;
    }
}

enum Outcome {
    Created,
    Updated,
    Unchanged,
}

pub struct EntityResolver {
    store: Arc<dyn GraphStore>,
    embedder: ChunkEmbedder,
    locks: KeyedLocks,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn GraphStore>, embedder: ChunkEmbedder) -> Self {
        Self {
            store,
            embedder,
            locks: KeyedLocks::new(),
        }
    }

    /// Resolve every mention found in one chunk and link it to the chunk.
    pub async fn resolve_entities(
        &self,
        chunk_id: Uuid,
        mentions: &[ExtractedEntity],
    ) -> Result<ResolutionStats> {
        let mut stats = ResolutionStats::default();

        for mention in mentions {
            let (entity, outcome) = self.resolve_entity(mention).await?;
            self.store.link_chunk_entity(chunk_id, entity.id).await?;

            match outcome {
                Outcome::Created => stats.entities_created += 1,
                Outcome::Updated => stats.entities_updated += 1,
                Outcome::Unchanged => stats.entities_unchanged += 1,
            }
        }

        self.locks.prune();
        Ok(stats)
    }

    async fn resolve_entity(&self, mention: &ExtractedEntity) -> Result<(Entity, Outcome)> {
        let key = IdentityKey::new(&mention.name, mention.entity_type);
        let _guard = self.locks.lock(&key).await;

        match self.store.find_entity(&key).await? {
            Some(mut existing) => {
                let description_filled =
                    existing.description.trim().is_empty() && !mention.description.is_empty();
                if description_filled {
                    existing.description = mention.description.clone();
                }

                let mut embedded = false;
                if description_filled || existing.embedding.is_none() {
                    if let Some(vector) = self.embedder.embed_text(&existing.embedding_text()).await
                    {
                        existing.embedding = Some(vector);
                        embedded = true;
                    }
                }

                if description_filled || embedded {
                    let stored = self.store.upsert_entity(&existing).await?;
                    debug!(entity = %key, "Updated entity");
                    Ok((stored, Outcome::Updated))
                } else {
                    Ok((existing, Outcome::Unchanged))
                }
            }
            None => {
                let mut entity = Entity::new(
                    mention.name.clone(),
                    mention.entity_type,
                    mention.description.clone(),
                );
                entity.embedding = self.embedder.embed_text(&entity.embedding_text()).await;
                let stored = self.store.upsert_entity(&entity).await?;
                debug!(entity = %key, id = %stored.id, "Created entity");
                Ok((stored, Outcome::Created))
            }
        }
    }

    /// Attach relations whose endpoints both resolve by name.
    pub async fn resolve_relations(&self, relations: &[ExtractedRelation]) -> Result<ResolutionStats> {
        let mut stats = ResolutionStats::default();

        for relation in relations {
            let source = self.first_by_name(&relation.source).await?;
            let target = self.first_by_name(&relation.target).await?;

            let (Some(source), Some(target)) = (source, target) else {
                debug!(
                    source = relation.source.as_str(),
                    target = relation.target.as_str(),
                    "Relation endpoint not found, skipping"
                );
                stats.relations_unresolved += 1;
                continue;
            };

            let edge = EntityRelation::new(
                source.id,
                target.id,
                relation.relationship.clone(),
                relation.description.clone(),
            );
            if self.store.add_relation(&edge).await? {
                stats.relations_created += 1;
            } else {
                stats.relations_skipped += 1;
            }
        }

        Ok(stats)
    }

    async fn first_by_name(&self, name: &str) -> Result<Option<Entity>> {
        Ok(self.store.find_entities_by_name(name).await?.into_iter().next())
    }
}
