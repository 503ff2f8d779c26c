//! Command implementations
//!
//! Each module backs one or more CLI subcommands; [`app::App`] wires the
//! services they share.

pub mod app;
pub mod documents;
pub mod ingest;
pub mod query;

// Re-export commonly used types
pub use app::{open_store, providers, App};
pub use ingest::{collect_files, run as ingest_run, IngestReport};
pub use query::run as query_run;
