//! Knowledge RAG CLI - main entry point
//!
//! Ingest documents into the knowledge graph and ask questions against it.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use knowledge_rag::commands::{self, App};
use knowledge_rag::{metrics, Config};

#[derive(Parser)]
#[command(name = "knowledge_rag")]
#[command(about = "Document knowledge graph with grounded question answering", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Config file (defaults to config.yml, then ../config.yml)
    #[arg(short, long, env = "RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Files or directories to ingest before running the command
    /// (useful with the in-memory store)
    #[arg(long, global = true)]
    preload: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a file or every file in a directory
    Ingest {
        /// File or directory path
        path: PathBuf,
    },

    /// Ask a question against the knowledge graph
    Query {
        /// Question text
        question: String,

        /// Session id the query is logged under
        #[arg(short, long, default_value = "cli")]
        session: String,
    },

    /// Attach a feedback label to an answered query
    Feedback {
        /// History id printed with the answer
        history_id: Uuid,

        /// Feedback label (e.g., helpful, wrong)
        label: String,
    },

    /// Show query history for a session
    History {
        #[arg(short, long, default_value = "cli")]
        session: String,

        /// Maximum number of records
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List documents
    Documents,

    /// Show one document with its chunks and entities
    Document {
        id: Uuid,
    },

    /// Delete a document, its stored file and its chunks
    Delete {
        id: Uuid,
    },

    /// Show entities related to the named entity
    Related {
        /// Entity name
        name: String,
    },

    /// Suggest questions for partial input
    Suggest {
        text: String,
    },

    /// Show graph and query statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("knowledge_rag=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::new(),
    };
    let app = App::build(config).await?;

    for path in &cli.preload {
        let report = commands::ingest_run(&app.ingestion, path).await?;
        info!(
            path = %path.display(),
            processed = report.processed(),
            failed = report.failed(),
            "Preloaded documents"
        );
    }

    execute_command(&app, cli.command).await
}

async fn execute_command(app: &App, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Ingest { path } => {
            let report = commands::ingest_run(&app.ingestion, &path).await?;
            println!(
                "\n{} processed, {} failed, {} skipped",
                report.processed(),
                report.failed(),
                report.skipped.len()
            );
        }
        Commands::Query { question, session } => {
            commands::query_run(&app.query, &question, &session).await?;
        }
        Commands::Feedback { history_id, label } => {
            commands::query::feedback(&app.query, history_id, &label).await?;
        }
        Commands::History { session, limit } => {
            commands::query::history(&app.query, &session, limit).await?;
        }
        Commands::Documents => {
            commands::documents::list(&app.ingestion).await?;
        }
        Commands::Document { id } => {
            commands::documents::show(&app.ingestion, id).await?;
        }
        Commands::Delete { id } => {
            commands::documents::delete(&app.ingestion, id).await?;
        }
        Commands::Related { name } => {
            commands::query::related(&app.query, &name).await?;
        }
        Commands::Suggest { text } => {
            commands::query::suggest(&app.query, &text).await?;
        }
        Commands::Stats => {
            commands::documents::stats(app.store.as_ref(), app.query.history()).await?;
        }
    }

    Ok(())
}
