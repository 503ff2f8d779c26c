//! Ingest files or whole directories

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::models::{Document, DocumentStatus};
use crate::rag::IngestionService;

/// Outcome of one `ingest` invocation.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents: Vec<Document>,
    /// Files that could not be read
    pub skipped: Vec<PathBuf>,
}

impl IngestReport {
    pub fn processed(&self) -> usize {
        self.count(DocumentStatus::Processed)
    }

    pub fn failed(&self) -> usize {
        self.count(DocumentStatus::Error)
    }

    fn count(&self, status: DocumentStatus) -> usize {
        self.documents.iter().filter(|d| d.status == status).count()
    }
}

/// Files to ingest under `path`, sorted. Hidden entries are skipped.
pub fn collect_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Ingest a file or every file in a directory tree, one after another.
pub async fn run(service: &IngestionService, path: &Path) -> Result<IngestReport> {
    if !path.exists() {
        anyhow::bail!("path does not exist: {}", path.display());
    }

    let mut report = IngestReport::default();
    for file in collect_files(path) {
        let bytes = match tokio::fs::read(&file).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %file.display(), "Skipping unreadable file: {}", err);
                report.skipped.push(file);
                continue;
            }
        };
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let document = service
            .ingest(&bytes, &filename)
            .await
            .with_context(|| format!("failed to ingest {}", file.display()))?;
        println!("{}  {:<10}  {}", document.id, document.status.as_str(), document.filename);
        report.documents.push(document);
    }

    info!(
        processed = report.processed(),
        failed = report.failed(),
        skipped = report.skipped.len(),
        "Ingestion finished"
    );
    Ok(report)
}
