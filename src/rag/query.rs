//! Question answering entry point.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::answer::{Answer, AnswerGenerator};
use super::history::QueryHistoryLog;
use super::retriever::RetrievalEngine;
use crate::metrics::{self, DegradedStep};
use crate::models::{DocumentChunk, Entity, EntityRelation, QueryHistory, Scored};
use crate::prompts::APOLOGY_ANSWER;
use crate::store::GraphStore;
use crate::Result;

/// Maximum number of suggestions returned.
const MAX_SUGGESTIONS: usize = 5;

/// Answer with its citations and the history record it was logged under.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub history_id: Uuid,
    pub answer: String,
    pub used_chunks: Vec<Scored<DocumentChunk>>,
    pub used_entities: Vec<Entity>,
    pub response_time_ms: u64,
}

impl QueryResult {
    pub fn chunk_ids(&self) -> Vec<Uuid> {
        self.used_chunks.iter().map(|c| c.item.id).collect()
    }
}

/// Entity reached through an outgoing relation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedEntity {
    pub entity: Entity,
    pub relation: EntityRelation,
}

pub struct QueryService {
    store: Arc<dyn GraphStore>,
    retriever: RetrievalEngine,
    generator: AnswerGenerator,
    history: QueryHistoryLog,
}

impl QueryService {
    pub fn new(store: Arc<dyn GraphStore>, retriever: RetrievalEngine, generator: AnswerGenerator) -> Self {
        Self {
            history: QueryHistoryLog::new(store.clone()),
            store,
            retriever,
            generator,
        }
    }

    pub fn history(&self) -> &QueryHistoryLog {
        &self.history
    }

    /// Answer `question`; failures degrade to an apology with no citations.
    ///
    /// Exactly one history record is appended per call.
    pub async fn submit_query(&self, question: &str, session_id: &str) -> QueryResult {
        let started = Instant::now();
        let history_id = Uuid::new_v4();

        let (answer, used_chunks, used_entities, answered) = match self.answer(question).await {
            Ok(answer) => (answer.text, answer.used_chunks, answer.used_entities, true),
            Err(err) => {
                error!(%history_id, "Query failed, returning fallback answer: {}", err);
                (APOLOGY_ANSWER.to_string(), Vec::new(), Vec::new(), false)
            }
        };

        let elapsed = started.elapsed();
        let result = QueryResult {
            history_id,
            answer,
            used_chunks,
            used_entities,
            response_time_ms: elapsed.as_millis() as u64,
        };

        let record = QueryHistory {
            id: history_id,
            question: question.to_string(),
            answer: result.answer.clone(),
            context_chunk_ids: result.chunk_ids(),
            response_time_ms: result.response_time_ms,
            user_feedback: None,
            session_id: session_id.to_string(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.history.record(&record).await {
            warn!(%history_id, "Failed to record query history: {}", err);
            metrics::record_degraded(DegradedStep::History);
        }

        metrics::record_query(answered);
        metrics::record_stage("query", elapsed);
        info!(
            %history_id,
            session_id,
            chunks = result.used_chunks.len(),
            entities = result.used_entities.len(),
            elapsed_ms = result.response_time_ms,
            answered,
            "Query completed"
        );
        result
    }

    async fn answer(&self, question: &str) -> Result<Answer> {
        let context = self.retriever.retrieve(question).await?;
        self.generator.generate(question, context).await
    }

    pub async fn provide_feedback(&self, history_id: Uuid, label: &str) -> Result<()> {
        self.history.provide_feedback(history_id, label).await
    }

    pub async fn list_history(&self, session_id: &str, limit: usize) -> Result<Vec<QueryHistory>> {
        self.history.list_history(session_id, limit).await
    }

    /// `Information about {name}` for entities whose name contains `partial`.
    pub async fn suggestions(&self, partial: &str) -> Result<Vec<String>> {
        let partial = partial.trim();
        if partial.chars().count() < 2 {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .keyword_search_entities(partial, MAX_SUGGESTIONS)
            .await?
            .into_iter()
            .map(|e| format!("Information about {}", e.name))
            .collect())
    }

    /// Targets of the first matching entity's outgoing relations, strongest first.
    pub async fn related_entities(&self, name: &str) -> Result<Vec<RelatedEntity>> {
        let Some(entity) = self.store.find_entities_by_name(name).await?.into_iter().next() else {
            return Ok(Vec::new());
        };

        let mut related = Vec::new();
        for relation in self.store.relations_from(entity.id).await? {
            if let Some(target) = self.store.get_entity(relation.target_id).await? {
                related.push(RelatedEntity {
                    entity: target,
                    relation,
                });
            }
        }
        Ok(related)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompletionSettings;
    use crate::integrations::{ChatMessage, CompletionProvider, HashEmbedder, RetryPolicy};
    use crate::models::{Document, EntityType};
    use crate::rag::embedder::ChunkEmbedder;
    use crate::rag::retriever::RetrievalSettings;
    use crate::store::InMemoryGraphStore;
    use crate::Error;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl CompletionProvider for Echo {
        async fn complete(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String> {
            Ok(format!("answer to {}", messages[1].content))
        }
    }

    struct Broken;

    #[async_trait]
    impl CompletionProvider for Broken {
        async fn complete(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String> {
            Err(Error::Provider("down".into()))
        }
    }

    fn completion() -> CompletionSettings {
        CompletionSettings {
            temperature: 0.3,
            max_tokens: 1000,
        }
    }

    async fn service(provider: Arc<dyn CompletionProvider>) -> (Arc<InMemoryGraphStore>, QueryService) {
        let store = Arc::new(InMemoryGraphStore::new());
        let embedder = ChunkEmbedder::new(Some(Arc::new(HashEmbedder::new(64))), "local");

        let doc = Document::new("a.txt", "text/plain", 1, "a.txt");
        store.save_document(&doc).await.unwrap();
        let mut chunk = DocumentChunk::new(doc.id, 0, "graphs have nodes");
        chunk.embedding = embedder.embed_text(&chunk.content).await;
        store.save_chunks(&[chunk]).await.unwrap();

        let retriever = RetrievalEngine::new(
            store.clone(),
            embedder,
            RetrievalSettings {
                max_context_chunks: 5,
                similarity_threshold: 0.5,
                entity_limit: 10,
            },
        );
        let generator = AnswerGenerator::new(Some(provider), "m", "English", completion())
            .with_retry(RetryPolicy::none());
        (store.clone(), QueryService::new(store, retriever, generator))
    }

    #[tokio::test]
    async fn answered_query_is_logged_with_its_citations() {
        let (_, service) = service(Arc::new(Echo)).await;

        let result = service.submit_query("graphs have nodes", "s1").await;

        assert_eq!(result.answer, "answer to graphs have nodes");
        assert_eq!(result.used_chunks.len(), 1);

        let history = service.list_history("s1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, result.history_id);
        assert_eq!(history[0].context_chunk_ids, result.chunk_ids());
    }

    #[tokio::test]
    async fn provider_failure_returns_apology_and_still_logs() {
        let (_, service) = service(Arc::new(Broken)).await;

        let result = service.submit_query("graphs have nodes", "s1").await;

        assert_eq!(result.answer, APOLOGY_ANSWER);
        assert!(result.used_chunks.is_empty());
        assert!(result.used_entities.is_empty());

        let history = service.list_history("s1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].context_chunk_ids.is_empty());
        assert_eq!(history[0].answer, APOLOGY_ANSWER);
    }

    #[tokio::test]
    async fn feedback_attaches_to_history() {
        let (_, service) = service(Arc::new(Echo)).await;
        let result = service.submit_query("anything", "s").await;

        service.provide_feedback(result.history_id, "helpful").await.unwrap();

        let history = service.list_history("s", 1).await.unwrap();
        assert_eq!(history[0].user_feedback.as_deref(), Some("helpful"));
    }

    #[tokio::test]
    async fn suggestions_need_two_characters() {
        let (store, service) = service(Arc::new(Echo)).await;
        for name in ["Graph", "Graph Theory", "Paragraph"] {
            store
                .upsert_entity(&Entity::new(name, EntityType::Concept, ""))
                .await
                .unwrap();
        }

        assert!(service.suggestions("g").await.unwrap().is_empty());
        let suggestions = service.suggestions("graph").await.unwrap();
        assert_eq!(suggestions.len(), 3);
        assert!(suggestions.contains(&"Information about Graph Theory".to_string()));
    }

    #[tokio::test]
    async fn related_entities_are_ordered_by_strength() {
        let (store, service) = service(Arc::new(Echo)).await;
        let ada = store
            .upsert_entity(&Entity::new("Ada", EntityType::Person, ""))
            .await
            .unwrap();
        let london = store
            .upsert_entity(&Entity::new("London", EntityType::Location, ""))
            .await
            .unwrap();
        let engine = store
            .upsert_entity(&Entity::new("Analytical Engine", EntityType::Product, ""))
            .await
            .unwrap();
        store
            .add_relation(&EntityRelation::new(ada.id, london.id, "LIVED_IN", "").with_strength(0.4))
            .await
            .unwrap();
        store
            .add_relation(&EntityRelation::new(ada.id, engine.id, "WROTE_ABOUT", ""))
            .await
            .unwrap();

        let related = service.related_entities("ada").await.unwrap();
        let names: Vec<&str> = related.iter().map(|r| r.entity.name.as_str()).collect();
        assert_eq!(names, vec!["Analytical Engine", "London"]);
        assert!(service.related_entities("nobody").await.unwrap().is_empty());
    }
}
