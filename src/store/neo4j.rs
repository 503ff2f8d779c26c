//! Graph store backed by Neo4j

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{query, Graph, Node, Query};
use tracing::{debug, info};
use uuid::Uuid;

use super::{GraphStore, StoreStats};
use crate::config::Neo4jSettings;
use crate::models::{
    normalize_name, Document, DocumentChunk, Entity, EntityRelation, IdentityKey, QueryHistory,
    Scored,
};
use crate::{Error, Result};

pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    /// Connect to Neo4j server
    pub async fn new(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password).await?;
        Ok(Self { graph })
    }

    /// Connect and make sure constraints exist
    pub async fn connect(settings: &Neo4jSettings) -> Result<Self> {
        let store = Self::new(&settings.uri, &settings.user, &settings.password).await?;
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize schema with constraints and indexes
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing Neo4j schema...");

        let statements = [
            "CREATE CONSTRAINT document_id IF NOT EXISTS FOR (d:Document) REQUIRE d.id IS UNIQUE",
            "CREATE CONSTRAINT chunk_id IF NOT EXISTS FOR (c:DocumentChunk) REQUIRE c.id IS UNIQUE",
            "CREATE CONSTRAINT entity_id IF NOT EXISTS FOR (e:Entity) REQUIRE e.id IS UNIQUE",
            "CREATE CONSTRAINT entity_identity IF NOT EXISTS FOR (e:Entity) REQUIRE (e.name_key, e.type) IS UNIQUE",
            "CREATE CONSTRAINT history_id IF NOT EXISTS FOR (q:QueryHistory) REQUIRE q.id IS UNIQUE",
            "CREATE INDEX chunk_document IF NOT EXISTS FOR (c:DocumentChunk) ON (c.document_id)",
            "CREATE INDEX history_session IF NOT EXISTS FOR (q:QueryHistory) ON (q.session_id)",
        ];

        for statement in statements {
            self.graph.run(query(statement)).await?;
        }

        info!("Schema initialized successfully");
        Ok(())
    }

    async fn collect_nodes<T>(
        &self,
        q: Query,
        column: &str,
        convert: impl Fn(&Node) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut result = self.graph.execute(q).await?;
        let mut items = Vec::new();
        while let Some(row) = result.next().await? {
            let node: Node = row.get(column)?;
            items.push(convert(&node)?);
        }
        Ok(items)
    }

    async fn collect_scored<T>(
        &self,
        q: Query,
        column: &str,
        convert: impl Fn(&Node) -> Result<T>,
    ) -> Result<Vec<Scored<T>>> {
        let mut result = self.graph.execute(q).await?;
        let mut items = Vec::new();
        while let Some(row) = result.next().await? {
            let node: Node = row.get(column)?;
            let score: f64 = row.get("score")?;
            items.push(Scored::new(convert(&node)?, raw_cosine(score)));
        }
        Ok(items)
    }

    /// True when the query produced at least one row.
    async fn returns_row(&self, q: Query) -> Result<bool> {
        let mut result = self.graph.execute(q).await?;
        Ok(result.next().await?.is_some())
    }

    async fn count(&self, cypher: &str) -> Result<usize> {
        let mut result = self.graph.execute(query(cypher)).await?;
        match result.next().await? {
            Some(row) => Ok(row.get::<i64>("n")?.max(0) as usize),
            None => Ok(0),
        }
    }
}

/// `vector.similarity.cosine` reports `(1 + cos) / 2`; map it back to raw cosine.
fn raw_cosine(score: f64) -> f32 {
    (2.0 * score - 1.0) as f32
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn vector_param(v: &[f32]) -> Vec<f64> {
    v.iter().map(|&x| x as f64).collect()
}

fn get<T: serde::de::DeserializeOwned>(node: &Node, key: &str) -> Result<T> {
    node.get::<T>(key)
        .map_err(|e| Error::Store(format!("missing property {}: {}", key, e)))
}

fn get_uuid(node: &Node, key: &str) -> Result<Uuid> {
    let raw: String = get(node, key)?;
    parse_uuid(&raw)
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Store(format!("invalid uuid {}: {}", raw, e)))
}

fn get_time(node: &Node, key: &str) -> Result<DateTime<Utc>> {
    let raw: String = get(node, key)?;
    parse_time(&raw)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("invalid timestamp {}: {}", raw, e)))
}

fn get_embedding(node: &Node) -> Option<Vec<f32>> {
    node.get::<Vec<f64>>("embedding")
        .ok()
        .map(|v| v.into_iter().map(|x| x as f32).collect())
}

fn to_document(node: &Node) -> Result<Document> {
    Ok(Document {
        id: get_uuid(node, "id")?,
        title: get(node, "title")?,
        filename: get(node, "filename")?,
        content_type: get(node, "content_type")?,
        file_size: get::<i64>(node, "file_size")?.max(0) as u64,
        file_path: get(node, "file_path")?,
        status: get::<String>(node, "status")?.parse()?,
        summary: node.get::<String>("summary").ok(),
        created_at: get_time(node, "created_at")?,
    })
}

fn to_chunk(node: &Node) -> Result<DocumentChunk> {
    Ok(DocumentChunk {
        id: get_uuid(node, "id")?,
        document_id: get_uuid(node, "document_id")?,
        chunk_index: get::<i64>(node, "chunk_index")?.max(0) as usize,
        content: get(node, "content")?,
        embedding: get_embedding(node),
        token_count: get::<i64>(node, "token_count")?.max(0) as usize,
        created_at: get_time(node, "created_at")?,
    })
}

fn to_entity(node: &Node) -> Result<Entity> {
    Ok(Entity {
        id: get_uuid(node, "id")?,
        name: get(node, "name")?,
        entity_type: get::<String>(node, "type")?.parse()?,
        description: node.get::<String>("description").unwrap_or_default(),
        embedding: get_embedding(node),
        created_at: get_time(node, "created_at")?,
    })
}

fn to_history(node: &Node) -> Result<QueryHistory> {
    let chunk_ids: Vec<String> = node.get("context_chunk_ids").unwrap_or_default();
    Ok(QueryHistory {
        id: get_uuid(node, "id")?,
        question: get(node, "question")?,
        answer: get(node, "answer")?,
        context_chunk_ids: chunk_ids
            .iter()
            .map(|id| parse_uuid(id))
            .collect::<Result<_>>()?,
        response_time_ms: get::<i64>(node, "response_time_ms")?.max(0) as u64,
        user_feedback: node.get::<String>("user_feedback").ok(),
        session_id: get(node, "session_id")?,
        created_at: get_time(node, "created_at")?,
    })
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn save_document(&self, document: &Document) -> Result<()> {
        let mut cypher = String::from(
            "MERGE (d:Document {id: $id})
             SET d.title = $title,
                 d.filename = $filename,
                 d.content_type = $content_type,
                 d.file_size = $file_size,
                 d.file_path = $file_path,
                 d.status = $status,
                 d.created_at = $created_at",
        );
        if document.summary.is_some() {
            cypher.push_str(", d.summary = $summary");
        }

        let q = query(&cypher)
            .param("id", document.id.to_string())
            .param("title", document.title.clone())
            .param("filename", document.filename.clone())
            .param("content_type", document.content_type.clone())
            .param("file_size", document.file_size as i64)
            .param("file_path", document.file_path.clone())
            .param("status", document.status.as_str())
            .param("created_at", timestamp(&document.created_at))
            .param("summary", document.summary.clone().unwrap_or_default());

        self.graph.run(q).await?;
        debug!(document_id = %document.id, status = %document.status, "Saved document");
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let q = query("MATCH (d:Document {id: $id}) RETURN d").param("id", id.to_string());
        Ok(self.collect_nodes(q, "d", to_document).await?.into_iter().next())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let q = query("MATCH (d:Document) RETURN d ORDER BY d.created_at DESC");
        self.collect_nodes(q, "d", to_document).await
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        if self.get_document(id).await?.is_none() {
            return Ok(false);
        }

        let q = query(
            "MATCH (d:Document {id: $id})
             OPTIONAL MATCH (d)-[:HAS_CHUNK]->(c:DocumentChunk)
             DETACH DELETE c, d",
        )
        .param("id", id.to_string());

        self.graph.run(q).await?;
        debug!(document_id = %id, "Deleted document");
        Ok(true)
    }

    async fn save_chunks(&self, chunks: &[DocumentChunk]) -> Result<()> {
        for chunk in chunks {
            let mut cypher = String::from(
                "MATCH (d:Document {id: $document_id})
                 MERGE (c:DocumentChunk {id: $id})
                 SET c.document_id = $document_id,
                     c.chunk_index = $chunk_index,
                     c.content = $content,
                     c.token_count = $token_count,
                     c.created_at = $created_at",
            );
            if chunk.embedding.is_some() {
                cypher.push_str(", c.embedding = $embedding");
            }
            cypher.push_str(" MERGE (d)-[:HAS_CHUNK]->(c) RETURN c.id AS id");

            let q = query(&cypher)
                .param("id", chunk.id.to_string())
                .param("document_id", chunk.document_id.to_string())
                .param("chunk_index", chunk.chunk_index as i64)
                .param("content", chunk.content.clone())
                .param("token_count", chunk.token_count as i64)
                .param("created_at", timestamp(&chunk.created_at))
                .param(
                    "embedding",
                    vector_param(chunk.embedding.as_deref().unwrap_or_default()),
                );

            if !self.returns_row(q).await? {
                return Err(Error::Store(format!(
                    "chunk {} references unknown document {}",
                    chunk.id, chunk.document_id
                )));
            }
        }
        debug!(count = chunks.len(), "Saved chunks");
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<DocumentChunk>> {
        let q = query(
            "MATCH (:Document {id: $id})-[:HAS_CHUNK]->(c:DocumentChunk)
             RETURN c ORDER BY c.chunk_index",
        )
        .param("id", document_id.to_string());
        self.collect_nodes(q, "c", to_chunk).await
    }

    async fn similarity_search_chunks(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<DocumentChunk>>> {
        let q = query(
            "MATCH (c:DocumentChunk)
             WHERE c.embedding IS NOT NULL AND size(c.embedding) = $dim
             WITH c, vector.similarity.cosine(c.embedding, $query) AS score
             ORDER BY score DESC, c.document_id, c.chunk_index
             LIMIT $limit
             RETURN c, score",
        )
        .param("dim", query_vector.len() as i64)
        .param("query", vector_param(query_vector))
        .param("limit", limit as i64);
        self.collect_scored(q, "c", to_chunk).await
    }

    async fn link_chunk_entity(&self, chunk_id: Uuid, entity_id: Uuid) -> Result<()> {
        let q = query(
            "MATCH (c:DocumentChunk {id: $chunk_id}), (e:Entity {id: $entity_id})
             MERGE (c)-[:CONTAINS_ENTITY]->(e)
             RETURN c.id AS id",
        )
        .param("chunk_id", chunk_id.to_string())
        .param("entity_id", entity_id.to_string());

        if !self.returns_row(q).await? {
            return Err(Error::Store(format!(
                "cannot link chunk {} to entity {}",
                chunk_id, entity_id
            )));
        }
        Ok(())
    }

    async fn entities_for_chunk(&self, chunk_id: Uuid) -> Result<Vec<Entity>> {
        let q = query(
            "MATCH (:DocumentChunk {id: $id})-[:CONTAINS_ENTITY]->(e:Entity)
             RETURN e ORDER BY e.created_at, e.id",
        )
        .param("id", chunk_id.to_string());
        self.collect_nodes(q, "e", to_entity).await
    }

    async fn chunks_for_entity(&self, entity_id: Uuid) -> Result<Vec<DocumentChunk>> {
        let q = query(
            "MATCH (c:DocumentChunk)-[:CONTAINS_ENTITY]->(:Entity {id: $id})
             RETURN c ORDER BY c.document_id, c.chunk_index",
        )
        .param("id", entity_id.to_string());
        self.collect_nodes(q, "c", to_chunk).await
    }

    async fn find_entity(&self, key: &IdentityKey) -> Result<Option<Entity>> {
        let q = query("MATCH (e:Entity {name_key: $name_key, type: $type}) RETURN e LIMIT 1")
            .param("name_key", key.name_key.clone())
            .param("type", key.entity_type.as_str());
        Ok(self.collect_nodes(q, "e", to_entity).await?.into_iter().next())
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity> {
        let key = entity.identity_key();
        let mut cypher = String::from(
            "MERGE (e:Entity {name_key: $name_key, type: $type})
             ON CREATE SET e.id = $id, e.name = $name, e.created_at = $created_at
             SET e.description = $description",
        );
        if entity.embedding.is_some() {
            cypher.push_str(", e.embedding = $embedding");
        } else {
            cypher.push_str(" REMOVE e.embedding");
        }
        cypher.push_str(" RETURN e");

        let q = query(&cypher)
            .param("name_key", key.name_key)
            .param("type", entity.entity_type.as_str())
            .param("id", entity.id.to_string())
            .param("name", entity.name.clone())
            .param("created_at", timestamp(&entity.created_at))
            .param("description", entity.description.clone())
            .param(
                "embedding",
                vector_param(entity.embedding.as_deref().unwrap_or_default()),
            );

        self.collect_nodes(q, "e", to_entity)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Store(format!("upsert of entity {} returned no row", entity.id)))
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
        let q = query("MATCH (e:Entity {id: $id}) RETURN e").param("id", id.to_string());
        Ok(self.collect_nodes(q, "e", to_entity).await?.into_iter().next())
    }

    async fn find_entities_by_name(&self, name: &str) -> Result<Vec<Entity>> {
        let q = query("MATCH (e:Entity {name_key: $name_key}) RETURN e ORDER BY e.created_at, e.id")
            .param("name_key", normalize_name(name));
        self.collect_nodes(q, "e", to_entity).await
    }

    async fn similarity_search_entities(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<Entity>>> {
        let q = query(
            "MATCH (e:Entity)
             WHERE e.embedding IS NOT NULL AND size(e.embedding) = $dim
             WITH e, vector.similarity.cosine(e.embedding, $query) AS score
             ORDER BY score DESC, e.id
             LIMIT $limit
             RETURN e, score",
        )
        .param("dim", query_vector.len() as i64)
        .param("query", vector_param(query_vector))
        .param("limit", limit as i64);
        self.collect_scored(q, "e", to_entity).await
    }

    async fn keyword_search_entities(&self, keyword: &str, limit: usize) -> Result<Vec<Entity>> {
        let q = query(
            "MATCH (e:Entity)
             WHERE toLower(e.name) CONTAINS toLower($keyword)
             RETURN e ORDER BY e.created_at, e.id
             LIMIT $limit",
        )
        .param("keyword", keyword)
        .param("limit", limit as i64);
        self.collect_nodes(q, "e", to_entity).await
    }

    async fn add_relation(&self, relation: &EntityRelation) -> Result<bool> {
        let (_, _, label_key) = relation.dedup_key();
        let q = query(
            "MATCH (s:Entity {id: $source_id}), (t:Entity {id: $target_id})
             MERGE (s)-[r:RELATED_TO {label_key: $label_key}]->(t)
             ON CREATE SET r.id = $id,
                           r.relationship_type = $relationship_type,
                           r.strength = $strength,
                           r.description = $description,
                           r.created_at = $created_at
             RETURN r.id = $id AS created",
        )
        .param("source_id", relation.source_id.to_string())
        .param("target_id", relation.target_id.to_string())
        .param("label_key", label_key)
        .param("id", relation.id.to_string())
        .param("relationship_type", relation.relationship_type.clone())
        .param("strength", relation.strength)
        .param("description", relation.description.clone())
        .param("created_at", timestamp(&relation.created_at));

        let mut result = self.graph.execute(q).await?;
        match result.next().await? {
            Some(row) => Ok(row.get::<bool>("created")?),
            None => Err(Error::Store(format!(
                "relation endpoints {} -> {} do not exist",
                relation.source_id, relation.target_id
            ))),
        }
    }

    async fn relations_from(&self, entity_id: Uuid) -> Result<Vec<EntityRelation>> {
        let q = query(
            "MATCH (s:Entity {id: $id})-[r:RELATED_TO]->(t:Entity)
             RETURN r.id AS id, t.id AS target_id, r.relationship_type AS relationship_type,
                    r.strength AS strength, r.description AS description,
                    r.created_at AS created_at
             ORDER BY r.strength DESC, r.created_at",
        )
        .param("id", entity_id.to_string());

        let mut result = self.graph.execute(q).await?;
        let mut relations = Vec::new();
        while let Some(row) = result.next().await? {
            relations.push(EntityRelation {
                id: parse_uuid(&row.get::<String>("id")?)?,
                source_id: entity_id,
                target_id: parse_uuid(&row.get::<String>("target_id")?)?,
                relationship_type: row.get("relationship_type")?,
                strength: row.get("strength")?,
                description: row.get::<String>("description").unwrap_or_default(),
                created_at: parse_time(&row.get::<String>("created_at")?)?,
            });
        }
        Ok(relations)
    }

    async fn append_history(&self, record: &QueryHistory) -> Result<()> {
        let mut cypher = String::from(
            "CREATE (q:QueryHistory {
                 id: $id,
                 question: $question,
                 answer: $answer,
                 context_chunk_ids: $context_chunk_ids,
                 response_time_ms: $response_time_ms,
                 session_id: $session_id,
                 created_at: $created_at
             })",
        );
        if record.user_feedback.is_some() {
            cypher.push_str(" SET q.user_feedback = $user_feedback");
        }

        let q = query(&cypher)
            .param("id", record.id.to_string())
            .param("question", record.question.clone())
            .param("answer", record.answer.clone())
            .param(
                "context_chunk_ids",
                record
                    .context_chunk_ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>(),
            )
            .param("response_time_ms", record.response_time_ms as i64)
            .param("session_id", record.session_id.clone())
            .param("created_at", timestamp(&record.created_at))
            .param("user_feedback", record.user_feedback.clone().unwrap_or_default());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn set_feedback(&self, history_id: Uuid, label: &str) -> Result<()> {
        let q = query(
            "MATCH (q:QueryHistory {id: $id})
             SET q.user_feedback = $label
             RETURN q.id AS id",
        )
        .param("id", history_id.to_string())
        .param("label", label);

        if !self.returns_row(q).await? {
            return Err(Error::NotFound(format!("query history {}", history_id)));
        }
        Ok(())
    }

    async fn history_for_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<QueryHistory>> {
        let q = query(
            "MATCH (q:QueryHistory {session_id: $session_id})
             RETURN q ORDER BY q.created_at DESC
             LIMIT $limit",
        )
        .param("session_id", session_id)
        .param("limit", limit as i64);
        self.collect_nodes(q, "q", to_history).await
    }

    async fn all_history(&self) -> Result<Vec<QueryHistory>> {
        let q = query("MATCH (q:QueryHistory) RETURN q ORDER BY q.created_at");
        self.collect_nodes(q, "q", to_history).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats {
            documents: self.count("MATCH (d:Document) RETURN count(d) AS n").await?,
            chunks: self.count("MATCH (c:DocumentChunk) RETURN count(c) AS n").await?,
            entities: self.count("MATCH (e:Entity) RETURN count(e) AS n").await?,
            relations: self
                .count("MATCH (:Entity)-[r:RELATED_TO]->(:Entity) RETURN count(r) AS n")
                .await?,
            queries: self.count("MATCH (q:QueryHistory) RETURN count(q) AS n").await?,
            entity_types: BTreeMap::new(),
        };

        let mut result = self
            .graph
            .execute(query(
                "MATCH (e:Entity) RETURN e.type AS type, count(e) AS n ORDER BY n DESC",
            ))
            .await?;
        while let Some(row) = result.next().await? {
            let label: String = row.get("type")?;
            let n: i64 = row.get("n")?;
            stats.entity_types.insert(label, n.max(0) as usize);
        }

        Ok(stats)
    }
}
