//! Integration tests for knowledge_rag library
//!
//! These tests drive the full ingestion and query pipeline with
//! deterministic stub providers and the in-memory graph store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_test::assert_ok;

use knowledge_rag::commands::App;
use knowledge_rag::config::{Config, RagSettings, RetrySettings};
use knowledge_rag::integrations::{ChatMessage, CompletionProvider, EmbeddingProvider, Role};
use knowledge_rag::models::{
    Document, DocumentChunk, Entity, EntityRelation, IdentityKey, QueryHistory, Scored,
};
use knowledge_rag::prompts::APOLOGY_ANSWER;
use knowledge_rag::rag::Chunker;
use knowledge_rag::store::StoreStats;
use knowledge_rag::{DocumentStatus, Error, GraphStore, InMemoryGraphStore, Result};

// ============================================================================
// Stub providers
// ============================================================================

const TOPICS: [&str; 3] = ["rust", "graph", "cook"];

/// One dimension per topic word plus a small constant bias.
struct TopicEmbedder;

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut v: Vec<f32> = TOPICS
                    .iter()
                    .map(|t| lower.matches(t).count() as f32)
                    .collect();
                v.push(0.01);
                v
            })
            .collect())
    }
}

struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    async fn embed(&self, _model: &str, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Provider("embedding service unavailable".into()))
    }
}

/// Answers system-prompted questions and extracts one fixed entity set.
///
/// Extraction calls also record the status of every stored document.
struct ScriptedLlm {
    extraction: String,
    store: Option<Arc<InMemoryGraphStore>>,
    seen_statuses: Mutex<Vec<DocumentStatus>>,
    extraction_calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(extraction: &str) -> Self {
        Self {
            extraction: extraction.to_string(),
            store: None,
            seen_statuses: Mutex::new(Vec::new()),
            extraction_calls: AtomicUsize::new(0),
        }
    }

    fn observing(extraction: &str, store: Arc<InMemoryGraphStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(extraction)
        }
    }
}

#[async_trait]
impl CompletionProvider for ScriptedLlm {
    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        if messages[0].role == Role::System {
            return Ok("Grounded answer.".to_string());
        }
        self.extraction_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(store) = &self.store {
            let statuses = store
                .list_documents()
                .await?
                .into_iter()
                .map(|d| d.status);
            self.seen_statuses.lock().unwrap().extend(statuses);
        }
        Ok(self.extraction.clone())
    }
}

struct DownLlm;

#[async_trait]
impl CompletionProvider for DownLlm {
    async fn complete(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        Err(Error::Provider("completion service unavailable".into()))
    }
}

/// In-memory store whose chunk or entity writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryGraphStore,
    fail_chunk_writes: bool,
    fail_entity_writes: bool,
}

#[async_trait]
impl GraphStore for FlakyStore {
    async fn save_document(&self, document: &Document) -> Result<()> {
        self.inner.save_document(document).await
    }

    async fn get_document(&self, id: uuid::Uuid) -> Result<Option<Document>> {
        self.inner.get_document(id).await
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        self.inner.list_documents().await
    }

    async fn delete_document(&self, id: uuid::Uuid) -> Result<bool> {
        self.inner.delete_document(id).await
    }

    async fn save_chunks(&self, chunks: &[DocumentChunk]) -> Result<()> {
        if self.fail_chunk_writes {
            return Err(Error::Store("chunk write rejected".into()));
        }
        self.inner.save_chunks(chunks).await
    }

    async fn chunks_for_document(&self, document_id: uuid::Uuid) -> Result<Vec<DocumentChunk>> {
        self.inner.chunks_for_document(document_id).await
    }

    async fn similarity_search_chunks(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<DocumentChunk>>> {
        self.inner.similarity_search_chunks(query, limit).await
    }

    async fn link_chunk_entity(&self, chunk_id: uuid::Uuid, entity_id: uuid::Uuid) -> Result<()> {
        self.inner.link_chunk_entity(chunk_id, entity_id).await
    }

    async fn entities_for_chunk(&self, chunk_id: uuid::Uuid) -> Result<Vec<Entity>> {
        self.inner.entities_for_chunk(chunk_id).await
    }

    async fn chunks_for_entity(&self, entity_id: uuid::Uuid) -> Result<Vec<DocumentChunk>> {
        self.inner.chunks_for_entity(entity_id).await
    }

    async fn find_entity(&self, key: &IdentityKey) -> Result<Option<Entity>> {
        self.inner.find_entity(key).await
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity> {
        if self.fail_entity_writes {
            return Err(Error::Store("entity write rejected".into()));
        }
        self.inner.upsert_entity(entity).await
    }

    async fn get_entity(&self, id: uuid::Uuid) -> Result<Option<Entity>> {
        self.inner.get_entity(id).await
    }

    async fn find_entities_by_name(&self, name: &str) -> Result<Vec<Entity>> {
        self.inner.find_entities_by_name(name).await
    }

    async fn similarity_search_entities(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<Entity>>> {
        self.inner.similarity_search_entities(query, limit).await
    }

    async fn keyword_search_entities(&self, keyword: &str, limit: usize) -> Result<Vec<Entity>> {
        self.inner.keyword_search_entities(keyword, limit).await
    }

    async fn add_relation(&self, relation: &EntityRelation) -> Result<bool> {
        self.inner.add_relation(relation).await
    }

    async fn relations_from(&self, entity_id: uuid::Uuid) -> Result<Vec<EntityRelation>> {
        self.inner.relations_from(entity_id).await
    }

    async fn append_history(&self, record: &QueryHistory) -> Result<()> {
        self.inner.append_history(record).await
    }

    async fn set_feedback(&self, history_id: uuid::Uuid, label: &str) -> Result<()> {
        self.inner.set_feedback(history_id, label).await
    }

    async fn history_for_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<QueryHistory>> {
        self.inner.history_for_session(session_id, limit).await
    }

    async fn all_history(&self) -> Result<Vec<QueryHistory>> {
        self.inner.all_history().await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }
}

const ADA_EXTRACTION: &str = r#"Here you go:
{"entities": [
    {"name": "Ada Lovelace", "type": "PERSON", "description": "mathematician"},
    {"name": "Analytical Engine", "type": "PRODUCT", "description": "mechanical computer"}
 ],
 "relations": [
    {"source": "Ada Lovelace", "target": "Analytical Engine", "relationship": "WROTE_ABOUT", "description": "notes"}
 ]}"#;

// ============================================================================
// Helpers
// ============================================================================

fn config(dir: &TempDir, threshold: f32) -> Config {
    Config {
        rag: RagSettings {
            chunk_size: 60,
            chunk_overlap: 10,
            max_context_chunks: 5,
            similarity_threshold: threshold,
            ..RagSettings::default()
        },
        retry: RetrySettings {
            max_retries: 0,
            base_delay_ms: 0,
        },
        upload_dir: dir.path().join("uploads"),
        ..Config::defaults()
    }
}

fn app(
    dir: &TempDir,
    store: Arc<dyn GraphStore>,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    completion: Option<Arc<dyn CompletionProvider>>,
    threshold: f32,
) -> App {
    App::with_providers(config(dir, threshold), store, embedding, completion)
}

// ============================================================================
// Chunker
// ============================================================================

#[test]
fn test_chunker_hand_traced_example() {
    let segments = Chunker::new(12, 3).chunk("The quick brown fox jumps over");
    let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["The quick", "brown fox", "jumps over"]);
}

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_document_lifecycle_reaches_processed() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryGraphStore::new());
    let llm = Arc::new(ScriptedLlm::observing(ADA_EXTRACTION, store.clone()));
    let app = app(&dir, store.clone(), Some(Arc::new(TopicEmbedder)), Some(llm.clone()), 0.5);

    let text = "Ada Lovelace wrote notes on the Analytical Engine. She described how it could \
                compute Bernoulli numbers, which many call the first program.";
    let doc = assert_ok!(app.ingestion.ingest(text.as_bytes(), "ada.txt").await);

    assert_eq!(doc.status, DocumentStatus::Processed);
    let stored = assert_ok!(app.ingestion.get_document(doc.id).await);
    assert_eq!(stored.status, DocumentStatus::Processed);
    let seen = llm.seen_statuses.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|s| *s == DocumentStatus::Processing));

    let chunks = assert_ok!(app.ingestion.document_chunks(doc.id).await);
    assert!(chunks.len() > 1);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
        assert!(chunk.embedding.is_some());
        assert!(!chunk.content.is_empty());
    }

    let entities = assert_ok!(app.ingestion.document_entities(doc.id).await);
    assert_eq!(entities.len(), 2);
}

#[tokio::test]
async fn test_unsupported_format_goes_to_error_without_chunks() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryGraphStore::new());
    let app = app(
        &dir,
        store.clone(),
        Some(Arc::new(TopicEmbedder)),
        Some(Arc::new(ScriptedLlm::new(ADA_EXTRACTION))),
        0.5,
    );

    let doc = assert_ok!(app.ingestion.ingest(b"%PDF-1.7 ...", "paper.pdf").await);

    assert_eq!(doc.status, DocumentStatus::Error);
    assert_eq!(doc.content_type, "application/pdf");
    assert!(assert_ok!(app.ingestion.document_chunks(doc.id).await).is_empty());
    assert_eq!(assert_ok!(store.stats().await).entities, 0);
}

#[tokio::test]
async fn test_extraction_failure_does_not_fail_document() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryGraphStore::new());
    let app = app(
        &dir,
        store.clone(),
        Some(Arc::new(TopicEmbedder)),
        Some(Arc::new(ScriptedLlm::new("I'd rather not {\"entities\": ["))),
        0.5,
    );

    let doc = assert_ok!(app.ingestion.ingest(b"Graph databases store nodes.", "g.md").await);

    assert_eq!(doc.status, DocumentStatus::Processed);
    assert_eq!(assert_ok!(app.ingestion.document_chunks(doc.id).await).len(), 1);
    assert!(assert_ok!(app.ingestion.document_entities(doc.id).await).is_empty());
}

#[tokio::test]
async fn test_embedding_outage_does_not_fail_document() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryGraphStore::new());
    let app = app(
        &dir,
        store.clone(),
        Some(Arc::new(DownEmbedder)),
        Some(Arc::new(ScriptedLlm::new(ADA_EXTRACTION))),
        0.5,
    );

    let doc = assert_ok!(app.ingestion.ingest(b"Ada Lovelace and the engine.", "a.txt").await);

    assert_eq!(doc.status, DocumentStatus::Processed);
    let chunks = assert_ok!(app.ingestion.document_chunks(doc.id).await);
    assert!(chunks.iter().all(|c| c.embedding.is_none()));
    assert_eq!(assert_ok!(app.ingestion.document_entities(doc.id).await).len(), 2);
}

#[tokio::test]
async fn test_chunk_write_failure_ends_in_error_before_extraction() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FlakyStore {
        fail_chunk_writes: true,
        ..FlakyStore::default()
    });
    let llm = Arc::new(ScriptedLlm::new(ADA_EXTRACTION));
    let app = app(&dir, store.clone(), Some(Arc::new(TopicEmbedder)), Some(llm.clone()), 0.5);

    let doc = assert_ok!(app.ingestion.ingest(b"Ada Lovelace and the engine.", "a.txt").await);

    assert_eq!(doc.status, DocumentStatus::Error);
    let stored = assert_ok!(app.ingestion.get_document(doc.id).await);
    assert_eq!(stored.status, DocumentStatus::Error);
    assert!(assert_ok!(app.ingestion.document_chunks(doc.id).await).is_empty());
    assert_eq!(llm.extraction_calls.load(Ordering::SeqCst), 0);
    assert_eq!(assert_ok!(store.stats().await).entities, 0);
}

#[tokio::test]
async fn test_entity_write_failure_ends_in_error_without_relations() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FlakyStore {
        fail_entity_writes: true,
        ..FlakyStore::default()
    });
    let app = app(
        &dir,
        store.clone(),
        Some(Arc::new(TopicEmbedder)),
        Some(Arc::new(ScriptedLlm::new(ADA_EXTRACTION))),
        0.5,
    );

    let doc = assert_ok!(app.ingestion.ingest(b"Ada Lovelace and the engine.", "a.txt").await);

    assert_eq!(doc.status, DocumentStatus::Error);
    assert!(assert_ok!(app.ingestion.document_entities(doc.id).await).is_empty());
    let stats = assert_ok!(store.stats().await);
    assert_eq!(stats.entities, 0);
    assert_eq!(stats.relations, 0);
}

#[tokio::test]
async fn test_entity_resolution_is_idempotent_across_documents() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryGraphStore::new());
    let app = Arc::new(app(
        &dir,
        store.clone(),
        Some(Arc::new(TopicEmbedder)),
        Some(Arc::new(ScriptedLlm::new(ADA_EXTRACTION))),
        0.5,
    ));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                let text = format!(
                    "Document {} mentions Ada Lovelace and the Analytical Engine more than once.",
                    i
                );
                app.ingestion.ingest(text.as_bytes(), &format!("doc{}.txt", i)).await
            })
        })
        .collect();

    let mut total_chunks = 0;
    for handle in handles {
        let doc = assert_ok!(handle.await.unwrap());
        assert_eq!(doc.status, DocumentStatus::Processed);
        total_chunks += assert_ok!(store.chunks_for_document(doc.id).await).len();
    }

    let ada = assert_ok!(store.find_entities_by_name("ada lovelace").await);
    assert_eq!(ada.len(), 1);
    assert_eq!(
        assert_ok!(store.chunks_for_entity(ada[0].id).await).len(),
        total_chunks
    );

    let stats = assert_ok!(store.stats().await);
    assert_eq!(stats.entities, 2);
    assert_eq!(stats.relations, 1);
}

#[tokio::test]
async fn test_delete_document_keeps_shared_entities() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryGraphStore::new());
    let app = app(
        &dir,
        store.clone(),
        Some(Arc::new(TopicEmbedder)),
        Some(Arc::new(ScriptedLlm::new(ADA_EXTRACTION))),
        0.5,
    );
    let doc = assert_ok!(app.ingestion.ingest(b"Ada Lovelace.", "a.txt").await);

    assert_ok!(app.ingestion.delete_document(doc.id).await);

    assert!(!std::path::Path::new(&doc.file_path).exists());
    assert!(assert_ok!(app.ingestion.list_documents().await).is_empty());
    assert_eq!(assert_ok!(store.stats().await).entities, 2);
}

// ============================================================================
// Query
// ============================================================================

async fn seeded(dir: &TempDir, threshold: f32, llm: Arc<dyn CompletionProvider>) -> (App, uuid::Uuid) {
    let store = Arc::new(InMemoryGraphStore::new());
    let ingest_app = app(
        dir,
        store.clone(),
        Some(Arc::new(TopicEmbedder)),
        Some(Arc::new(ScriptedLlm::new(ADA_EXTRACTION))),
        threshold,
    );
    assert_ok!(ingest_app.ingestion.ingest(b"Rust is a systems language.", "rust.txt").await);
    let cooking = assert_ok!(
        ingest_app
            .ingestion
            .ingest(b"Cooking pasta takes ten minutes.", "cooking.txt")
            .await
    );

    let query_app = app(dir, store, Some(Arc::new(TopicEmbedder)), Some(llm), threshold);
    (query_app, cooking.id)
}

#[tokio::test]
async fn test_threshold_excludes_low_similarity_chunks() {
    let dir = TempDir::new().unwrap();
    let (app, cooking_id) = seeded(&dir, 0.5, Arc::new(ScriptedLlm::new(ADA_EXTRACTION))).await;

    let result = app.query.submit_query("Tell me about rust", "s1").await;

    assert_eq!(result.answer, "Grounded answer.");
    assert_eq!(result.used_chunks.len(), 1);
    assert!(result.used_chunks.iter().all(|c| c.score >= 0.5));
    assert!(result
        .used_chunks
        .iter()
        .all(|c| c.item.document_id != cooking_id));
}

#[tokio::test]
async fn test_permissive_threshold_includes_every_ranked_chunk() {
    let dir = TempDir::new().unwrap();
    let (app, cooking_id) = seeded(&dir, -1.0, Arc::new(ScriptedLlm::new(ADA_EXTRACTION))).await;

    let result = app.query.submit_query("Tell me about rust", "s1").await;

    assert_eq!(result.used_chunks.len(), 2);
    assert_eq!(result.used_chunks[1].item.document_id, cooking_id);
}

#[tokio::test]
async fn test_every_query_appends_one_history_record() {
    let dir = TempDir::new().unwrap();
    let (app, _) = seeded(&dir, 0.5, Arc::new(ScriptedLlm::new(ADA_EXTRACTION))).await;

    let mut results = Vec::new();
    for question in ["what is rust", "how long to cook pasta", "rust again"] {
        results.push(app.query.submit_query(question, "session-a").await);
    }
    app.query.submit_query("other session", "session-b").await;

    let history = assert_ok!(app.query.list_history("session-a", 10).await);
    assert_eq!(history.len(), 3);
    for result in &results {
        let record = history.iter().find(|h| h.id == result.history_id).unwrap();
        assert_eq!(record.context_chunk_ids, result.chunk_ids());
        assert_eq!(record.answer, result.answer);
        assert_eq!(record.response_time_ms, result.response_time_ms);
    }

    assert_ok!(app.query.provide_feedback(results[0].history_id, "helpful").await);
    let feedback = assert_ok!(app.query.history().feedback_stats().await);
    assert_eq!(feedback.get("helpful"), Some(&1));
}

#[tokio::test]
async fn test_completion_failure_falls_back_to_apology() {
    let dir = TempDir::new().unwrap();
    let (app, _) = seeded(&dir, 0.5, Arc::new(DownLlm)).await;

    let result = app.query.submit_query("Tell me about rust", "s1").await;

    assert_eq!(result.answer, APOLOGY_ANSWER);
    assert!(result.used_chunks.is_empty());
    assert!(result.used_entities.is_empty());

    let history = assert_ok!(app.query.list_history("s1", 10).await);
    assert_eq!(history.len(), 1);
    assert!(history[0].context_chunk_ids.is_empty());
}

#[tokio::test]
async fn test_feedback_for_unknown_history_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (app, _) = seeded(&dir, 0.5, Arc::new(ScriptedLlm::new(ADA_EXTRACTION))).await;

    let err = app
        .query
        .provide_feedback(uuid::Uuid::new_v4(), "helpful")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_related_entities_and_suggestions() {
    let dir = TempDir::new().unwrap();
    let (app, _) = seeded(&dir, 0.5, Arc::new(ScriptedLlm::new(ADA_EXTRACTION))).await;

    let related = assert_ok!(app.query.related_entities("Ada Lovelace").await);
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].entity.name, "Analytical Engine");
    assert_eq!(related[0].relation.relationship_type, "WROTE_ABOUT");

    let suggestions = assert_ok!(app.query.suggestions("lovelace").await);
    assert_eq!(suggestions, vec!["Information about Ada Lovelace".to_string()]);
}
