//! Service wiring from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{Config, ProviderKind};
use crate::integrations::embeddings::model_dimension;
use crate::integrations::{
    CompletionProvider, EmbeddingProvider, EmbeddingService, HashEmbedder, OllamaClient,
    OpenAIClient, PlainTextExtractor, RetryPolicy,
};
use crate::rag::{
    AnswerGenerator, ChunkEmbedder, EntityExtractor, IngestionService, QueryService,
    RetrievalEngine, RetrievalSettings,
};
use crate::store::{GraphStore, InMemoryGraphStore, Neo4jGraphStore};

/// Default dimension for hashed local embeddings.
pub const LOCAL_EMBEDDING_DIM: usize = 256;

type Providers = (
    Option<Arc<dyn EmbeddingProvider>>,
    Option<Arc<dyn CompletionProvider>>,
);

/// Everything a CLI command needs.
pub struct App {
    pub config: Config,
    pub store: Arc<dyn GraphStore>,
    pub ingestion: IngestionService,
    pub query: QueryService,
}

impl App {
    /// Connect the store and build both services.
    pub async fn build(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let store = open_store(&config).await?;
        Self::with_store(config, store)
    }

    /// Build services on top of an existing store.
    ///
    /// Fills in the embedding dimension for the configured backend when the
    /// config leaves it unset.
    pub fn with_store(mut config: Config, store: Arc<dyn GraphStore>) -> Result<Self> {
        config.embedding_dimensions = embedding_dimensions(&config);
        let (embedding, completion) = providers(&config)?;
        Ok(Self::with_providers(config, store, embedding, completion))
    }

    pub fn with_providers(
        config: Config,
        store: Arc<dyn GraphStore>,
        embedding: Option<Arc<dyn EmbeddingProvider>>,
        completion: Option<Arc<dyn CompletionProvider>>,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);

        let embedder = ChunkEmbedder::new(embedding, config.embedding_model.clone())
            .with_retry(retry)
            .with_dimensions(config.embedding_dimensions);
        let extractor = EntityExtractor::new(
            completion.clone(),
            config.chat_model.clone(),
            config.extraction.clone(),
        )
        .with_retry(retry);
        let generator = AnswerGenerator::new(
            completion,
            config.chat_model.clone(),
            config.answer_language.clone(),
            config.answer.clone(),
        )
        .with_retry(retry);

        let retriever = RetrievalEngine::new(
            store.clone(),
            embedder.clone(),
            RetrievalSettings {
                max_context_chunks: config.rag.max_context_chunks,
                similarity_threshold: config.rag.similarity_threshold,
                entity_limit: config.rag.entity_limit,
            },
        );

        let ingestion = IngestionService::new(
            store.clone(),
            Arc::new(PlainTextExtractor),
            embedder,
            extractor,
            &config.rag,
            config.upload_dir.clone(),
        );
        let query = QueryService::new(store.clone(), retriever, generator);

        Self {
            config,
            store,
            ingestion,
            query,
        }
    }
}

/// Neo4j when configured, otherwise an in-memory graph for this process.
pub async fn open_store(config: &Config) -> Result<Arc<dyn GraphStore>> {
    match &config.neo4j {
        Some(settings) => {
            let store = Neo4jGraphStore::connect(settings)
                .await
                .with_context(|| format!("failed to connect to Neo4j at {}", settings.uri))?;
            info!(uri = %settings.uri, "Using Neo4j graph store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("NEO4J_URI not set, using in-memory graph store (data is not persisted)");
            Ok(Arc::new(InMemoryGraphStore::new()))
        }
    }
}

/// Fixed vector dimension for the configured embedding backend.
///
/// `None` when neither the config nor the model name pins it (Ollama models,
/// unknown OpenAI models).
pub fn embedding_dimensions(config: &Config) -> Option<usize> {
    config.embedding_dimensions.or(match config.provider {
        ProviderKind::OpenAi => model_dimension(&config.embedding_model),
        ProviderKind::Local => Some(LOCAL_EMBEDDING_DIM),
        ProviderKind::Ollama => None,
    })
}

/// Embedding and completion providers for the configured backend.
pub fn providers(config: &Config) -> Result<Providers> {
    let openai_chat = |key: &str| -> Result<Arc<dyn CompletionProvider>> {
        let client =
            OpenAIClient::with_timeout(key, Duration::from_secs(config.openai_timeout_secs))?
                .with_base_url(config.openai_api_url.clone());
        Ok(Arc::new(client))
    };

    let providers: Providers = match config.provider {
        ProviderKind::OpenAi => match config.openai_api_key.as_deref() {
            Some(key) => {
                let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(
                    EmbeddingService::with_base_url(key, config.openai_api_url.clone())?,
                );
                (Some(embeddings), Some(openai_chat(key)?))
            }
            None => {
                warn!("OPENAI_API_KEY not set, embeddings and completions are disabled");
                (None, None)
            }
        },
        ProviderKind::Ollama => {
            let client = Arc::new(OllamaClient::with_url(config.ollama_url.clone()));
            let embeddings: Arc<dyn EmbeddingProvider> = client.clone();
            let completion: Arc<dyn CompletionProvider> = client;
            (Some(embeddings), Some(completion))
        }
        ProviderKind::Local => {
            let dim = embedding_dimensions(config).unwrap_or(LOCAL_EMBEDDING_DIM);
            let completion = match config.openai_api_key.as_deref() {
                Some(key) => Some(openai_chat(key)?),
                None => {
                    warn!("OPENAI_API_KEY not set, extraction and answering are disabled");
                    None
                }
            };
            let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(dim));
            (Some(embeddings), completion)
        }
    };

    info!(
        provider = ?config.provider,
        embeddings = providers.0.is_some(),
        completions = providers.1.is_some(),
        "Providers configured"
    );
    Ok(providers)
}
