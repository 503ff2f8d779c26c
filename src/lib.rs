//! Knowledge graph RAG library
//!
//! This library provides tools to:
//! - Ingest documents and split them into overlapping chunks
//! - Embed chunks and entities through OpenAI, Ollama or local hashing
//! - Extract entities and relations with an LLM and merge them into a shared graph
//! - Store the graph in Neo4j or in memory
//! - Answer questions from retrieved chunks and entities, citing the evidence
//! - Record query history, feedback and Prometheus metrics

pub mod config;
pub mod error;
pub mod integrations;
pub mod metrics;
pub mod models;
pub mod prompts;
pub mod rag;
pub mod store;

// Re-export common types
pub use config::Config;
pub use error::{Error, Result};
pub use integrations::{EmbeddingService, HashEmbedder, OllamaClient, OpenAIClient};
pub use models::{Document, DocumentChunk, DocumentStatus, Entity, EntityType, QueryHistory};
pub use prompts::{load_prompt, Prompt};
pub use rag::{IngestionService, QueryResult, QueryService};
pub use store::{GraphStore, InMemoryGraphStore, Neo4jGraphStore};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
