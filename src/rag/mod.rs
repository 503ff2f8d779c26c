//! Ingestion-to-knowledge-graph pipeline and the hybrid query engine.
//!
//! Ingestion: `Chunker -> ChunkEmbedder -> EntityExtractor -> EntityResolver -> GraphStore`.
//! Query: `RetrievalEngine -> AnswerGenerator -> QueryHistoryLog`.

pub mod answer;
pub mod chunker;
pub mod embedder;
pub mod entity_extractor;
pub mod history;
pub mod ingest;
pub mod query;
pub mod resolver;
pub mod retriever;

pub use answer::{Answer, AnswerGenerator};
pub use chunker::{Chunker, Segment};
pub use embedder::ChunkEmbedder;
pub use entity_extractor::{
    find_json_objects, parse_extraction, EntityExtractor, ExtractedEntity, ExtractedRelation,
    Extraction,
};
pub use history::{QueryHistoryLog, ResponseTimeStats};
pub use ingest::IngestionService;
pub use query::{QueryResult, QueryService, RelatedEntity};
pub use resolver::{EntityResolver, KeyedLocks, ResolutionStats};
pub use retriever::{RetrievalEngine, RetrievalSettings, RetrievedContext};
