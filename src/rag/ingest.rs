//! Document ingestion: store the upload, then drive it through chunking,
//! embedding, extraction and resolution.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::chunker::Chunker;
use super::embedder::ChunkEmbedder;
use super::entity_extractor::{EntityExtractor, Extraction};
use super::resolver::{EntityResolver, ResolutionStats};
use crate::config::RagSettings;
use crate::integrations::{detect_mime, TextExtractor};
use crate::metrics;
use crate::models::{summarize, Document, DocumentChunk, DocumentStatus, Entity};
use crate::store::GraphStore;
use crate::{Error, Result};

pub struct IngestionService {
    store: Arc<dyn GraphStore>,
    text_extractor: Arc<dyn TextExtractor>,
    chunker: Chunker,
    embedder: ChunkEmbedder,
    entity_extractor: EntityExtractor,
    resolver: EntityResolver,
    upload_dir: PathBuf,
    summary_chars: usize,
    concurrency: usize,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn GraphStore>,
        text_extractor: Arc<dyn TextExtractor>,
        embedder: ChunkEmbedder,
        entity_extractor: EntityExtractor,
        settings: &RagSettings,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        let embedder = embedder.with_concurrency(settings.concurrency);
        Self {
            resolver: EntityResolver::new(store.clone(), embedder.clone()),
            store,
            text_extractor,
            chunker: Chunker::new(settings.chunk_size, settings.chunk_overlap),
            embedder,
            entity_extractor,
            upload_dir: upload_dir.into(),
            summary_chars: settings.summary_chars,
            concurrency: settings.concurrency.max(1),
        }
    }

    /// Store the upload and process it to completion.
    ///
    /// Returns the final document: `PROCESSED`, or `ERROR` when text
    /// extraction or a graph write failed. Errors are returned only when the
    /// document itself could not be saved.
    pub async fn ingest(&self, bytes: &[u8], filename: &str) -> Result<Document> {
        let started = Instant::now();
        let filename = base_filename(filename)?;

        let mut document = Document::new(
            filename.as_str(),
            detect_mime(&filename),
            bytes.len() as u64,
            "",
        );
        let path = self.store_file(bytes, document.id, &filename).await?;
        document.file_path = path.to_string_lossy().into_owned();
        self.store.save_document(&document).await?;
        info!(
            document_id = %document.id,
            filename = %document.filename,
            content_type = %document.content_type,
            size = document.file_size,
            "Document uploaded"
        );

        document.advance(DocumentStatus::Processing)?;
        self.store.save_document(&document).await?;

        match self.process(&mut document, bytes).await {
            Ok(stats) => {
                document.advance(DocumentStatus::Processed)?;
                info!(
                    document_id = %document.id,
                    entities_created = stats.entities_created,
                    entities_updated = stats.entities_updated,
                    relations_created = stats.relations_created,
                    relations_skipped = stats.relations_skipped,
                    "Document processed"
                );
            }
            Err(err) => {
                error!(document_id = %document.id, "Document processing failed: {}", err);
                document.advance(DocumentStatus::Error)?;
            }
        }
        self.store.save_document(&document).await?;

        metrics::record_document(document.status);
        metrics::record_stage("ingest", started.elapsed());
        Ok(document)
    }

    async fn process(&self, document: &mut Document, bytes: &[u8]) -> Result<ResolutionStats> {
        let text = self.text_extractor.extract(bytes, &document.content_type)?;
        document.summary = Some(summarize(text.trim(), self.summary_chars));

        let chunks: Vec<DocumentChunk> = self
            .chunker
            .chunk(&text)
            .into_iter()
            .map(|segment| DocumentChunk::new(document.id, segment.index, segment.text))
            .collect();
        info!(document_id = %document.id, chunks = chunks.len(), "Document chunked");

        let chunks = self.embedder.embed_chunks(chunks).await;
        self.store.save_chunks(&chunks).await?;

        let inputs: Vec<(usize, Uuid, String)> = chunks
            .iter()
            .map(|chunk| (chunk.chunk_index, chunk.id, chunk.content.clone()))
            .collect();
        let mut extractions: Vec<(usize, Uuid, Extraction)> = stream::iter(inputs)
            .map(|(chunk_index, chunk_id, content)| async move {
                let extraction = self.entity_extractor.extract(&content).await;
                (chunk_index, chunk_id, extraction)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        extractions.sort_by_key(|(index, _, _)| *index);

        // All entities first so relations can point at mentions from any chunk.
        let mut stats = ResolutionStats::default();
        for (_, chunk_id, extraction) in &extractions {
            stats += self
                .resolver
                .resolve_entities(*chunk_id, &extraction.entities)
                .await?;
        }
        for (_, _, extraction) in &extractions {
            stats += self.resolver.resolve_relations(&extraction.relations).await?;
        }

        Ok(stats)
    }

    /// Stored as `{unix_millis}_{document_id}_{filename}` so uploads never collide.
    async fn store_file(&self, bytes: &[u8], id: Uuid, filename: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let path = self.upload_dir.join(format!(
            "{}_{}_{}",
            Utc::now().timestamp_millis(),
            id,
            filename
        ));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Document> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))
    }

    /// Newest first.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        self.store.list_documents().await
    }

    pub async fn document_chunks(&self, id: Uuid) -> Result<Vec<DocumentChunk>> {
        self.get_document(id).await?;
        self.store.chunks_for_document(id).await
    }

    pub async fn document_entities(&self, id: Uuid) -> Result<Vec<Entity>> {
        self.get_document(id).await?;
        self.store.entities_for_document(id).await
    }

    /// Remove the stored file and the document's graph data.
    ///
    /// A missing file is logged, not fatal; entities stay in the graph.
    pub async fn delete_document(&self, id: Uuid) -> Result<()> {
        let document = self.get_document(id).await?;

        if let Err(err) = tokio::fs::remove_file(&document.file_path).await {
            warn!(document_id = %id, path = %document.file_path, "Failed to remove stored file: {}", err);
        }
        self.store.delete_document(id).await?;
        info!(document_id = %id, "Document deleted");
        Ok(())
    }
}

/// Last path component of an uploaded file name.
fn base_filename(filename: &str) -> Result<String> {
    Path::new(filename.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::InvalidArgument(format!("invalid file name: {:?}", filename)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompletionSettings;
    use crate::integrations::{ChatMessage, CompletionProvider, HashEmbedder, PlainTextExtractor};
    use crate::store::InMemoryGraphStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct OneEntity;

    #[async_trait]
    impl CompletionProvider for OneEntity {
        async fn complete(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String> {
            Ok(r#"{"entities": [{"name": "Graph", "type": "CONCEPT", "description": "nodes and edges"}], "relations": []}"#.to_string())
        }
    }

    fn service(store: Arc<InMemoryGraphStore>, dir: &TempDir) -> IngestionService {
        let settings = RagSettings {
            chunk_size: 40,
            chunk_overlap: 5,
            ..RagSettings::default()
        };
        let extraction = CompletionSettings {
            temperature: 0.1,
            max_tokens: 1000,
        };
        IngestionService::new(
            store,
            Arc::new(PlainTextExtractor),
            ChunkEmbedder::new(Some(Arc::new(HashEmbedder::new(16))), "local"),
            EntityExtractor::new(Some(Arc::new(OneEntity)), "m", extraction),
            &settings,
            dir.path().join("uploads"),
        )
    }

    const TEXT: &str = "A graph has nodes. A graph has edges. Every graph in this note is small.";

    #[test]
    fn base_filename_strips_directories() {
        assert_eq!(base_filename("../../etc/notes.txt").unwrap(), "notes.txt");
        assert!(base_filename("  ").is_err());
    }

    #[tokio::test]
    async fn text_file_is_processed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryGraphStore::new());
        let service = service(store.clone(), &dir);

        let document = service.ingest(TEXT.as_bytes(), "notes.txt").await.unwrap();

        assert_eq!(document.status, DocumentStatus::Processed);
        assert_eq!(document.title, "notes");
        assert_eq!(document.content_type, "text/plain");
        assert_eq!(document.file_size, TEXT.len() as u64);
        assert_eq!(document.summary.as_deref(), Some(TEXT));
        assert!(Path::new(&document.file_path).exists());

        let chunks = service.document_chunks(document.id).await.unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            (0..chunks.len()).collect::<Vec<_>>()
        );
        assert!(chunks.iter().all(|c| c.embedding.is_some()));

        let entities = service.document_entities(document.id).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(store.chunks_for_entity(entities[0].id).await.unwrap().len(), chunks.len());
    }

    #[tokio::test]
    async fn unsupported_format_ends_in_error_without_chunks() {
        let dir = TempDir::new().unwrap();
        let service = service(Arc::new(InMemoryGraphStore::new()), &dir);

        let document = service.ingest(b"%PDF-1.4 binary", "report.pdf").await.unwrap();

        assert_eq!(document.status, DocumentStatus::Error);
        assert_eq!(
            service.get_document(document.id).await.unwrap().status,
            DocumentStatus::Error
        );
        assert!(service.document_chunks(document.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_file_and_document() {
        let dir = TempDir::new().unwrap();
        let service = service(Arc::new(InMemoryGraphStore::new()), &dir);
        let document = service.ingest(TEXT.as_bytes(), "notes.txt").await.unwrap();

        service.delete_document(document.id).await.unwrap();

        assert!(!Path::new(&document.file_path).exists());
        assert!(matches!(
            service.get_document(document.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(service.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_name_uploads_keep_separate_files() {
        let dir = TempDir::new().unwrap();
        let service = service(Arc::new(InMemoryGraphStore::new()), &dir);
        let (first, second) = tokio::join!(
            service.ingest(b"first upload", "notes.txt"),
            service.ingest(b"second upload", "notes.txt")
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_ne!(first.file_path, second.file_path);
        assert!(first.file_path.contains(&first.id.to_string()));

        service.delete_document(first.id).await.unwrap();
        assert_eq!(
            std::fs::read(&second.file_path).unwrap(),
            b"second upload".to_vec()
        );
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let dir = TempDir::new().unwrap();
        let service = service(Arc::new(InMemoryGraphStore::new()), &dir);
        assert!(matches!(
            service.delete_document(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
    }
}
