//! Document listing, inspection, deletion and graph statistics

use anyhow::Result;
use uuid::Uuid;

use super::query::preview;
use crate::models::Document;
use crate::rag::{IngestionService, QueryHistoryLog};
use crate::store::GraphStore;

pub fn format_document(doc: &Document) -> String {
    format!(
        "{}  {:<10}  {:>9} B  {}  {}",
        doc.id,
        doc.status.as_str(),
        doc.file_size,
        doc.created_at.format("%Y-%m-%d %H:%M"),
        doc.filename
    )
}

pub async fn list(service: &IngestionService) -> Result<()> {
    let documents = service.list_documents().await?;
    if documents.is_empty() {
        println!("No documents");
        return Ok(());
    }
    for doc in &documents {
        println!("{}", format_document(doc));
    }
    Ok(())
}

pub async fn show(service: &IngestionService, id: Uuid) -> Result<()> {
    let doc = service.get_document(id).await?;
    let chunks = service.document_chunks(id).await?;
    let entities = service.document_entities(id).await?;

    println!("{}", format_document(&doc));
    println!("Title:        {}", doc.title);
    println!("Content type: {}", doc.content_type);
    println!("Stored at:    {}", doc.file_path);
    if let Some(summary) = &doc.summary {
        println!("Summary:      {}", preview(summary, 200));
    }

    println!("\nChunks ({}):", chunks.len());
    for chunk in &chunks {
        println!(
            "  #{:<4} ~{} tokens{}  {}",
            chunk.chunk_index,
            chunk.token_count,
            if chunk.embedding.is_some() { "" } else { " (no embedding)" },
            preview(&chunk.content, 80)
        );
    }

    println!("\nEntities ({}):", entities.len());
    for entity in &entities {
        println!("  {} ({}): {}", entity.name, entity.entity_type, entity.description);
    }
    Ok(())
}

pub async fn delete(service: &IngestionService, id: Uuid) -> Result<()> {
    service.delete_document(id).await?;
    println!("Deleted document {}", id);
    Ok(())
}

pub async fn stats(store: &dyn GraphStore, history: &QueryHistoryLog) -> Result<()> {
    let stats = store.stats().await?;
    let times = history.response_time_stats().await?;
    let feedback = history.feedback_stats().await?;

    println!("Documents: {}", stats.documents);
    println!("Chunks:    {}", stats.chunks);
    println!("Entities:  {}", stats.entities);
    for (entity_type, count) in &stats.entity_types {
        println!("  {:<13} {}", entity_type, count);
    }
    println!("Relations: {}", stats.relations);
    println!("Queries:   {}", stats.queries);
    if times.count > 0 {
        println!(
            "Latency:   avg {:.0} ms, min {} ms, max {} ms",
            times.avg_ms, times.min_ms, times.max_ms
        );
    }
    for (label, count) in &feedback {
        println!("Feedback '{}': {}", label, count);
    }
    Ok(())
}
