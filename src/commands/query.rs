//! Query, feedback and history commands

use anyhow::Result;
use uuid::Uuid;

use crate::models::QueryHistory;
use crate::rag::{QueryResult, QueryService};

/// Characters of chunk content shown per citation.
const CITATION_PREVIEW: usize = 120;

/// Render an answer followed by its citations.
pub fn format_result(result: &QueryResult) -> String {
    let mut out = format!("{}\n", result.answer);

    if !result.used_chunks.is_empty() {
        out.push_str("\nSources:\n");
        for (i, chunk) in result.used_chunks.iter().enumerate() {
            out.push_str(&format!(
                "  [{}] document {} chunk {} (score {:.3}): {}\n",
                i + 1,
                chunk.item.document_id,
                chunk.item.chunk_index,
                chunk.score,
                preview(&chunk.item.content, CITATION_PREVIEW)
            ));
        }
    }

    if !result.used_entities.is_empty() {
        let names: Vec<&str> = result.used_entities.iter().map(|e| e.name.as_str()).collect();
        out.push_str(&format!("\nEntities: {}\n", names.join(", ")));
    }

    out.push_str(&format!(
        "\nhistory id: {}  ({} ms)",
        result.history_id, result.response_time_ms
    ));
    out
}

pub fn format_history(record: &QueryHistory) -> String {
    format!(
        "{}  {}  {} ms  feedback: {}\n  Q: {}\n  A: {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        record.id,
        record.response_time_ms,
        record.user_feedback.as_deref().unwrap_or("-"),
        record.question,
        preview(&record.answer, CITATION_PREVIEW)
    )
}

/// Single-line preview of at most `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

pub async fn run(service: &QueryService, question: &str, session: &str) -> Result<QueryResult> {
    let result = service.submit_query(question, session).await;
    println!("{}", format_result(&result));
    Ok(result)
}

pub async fn feedback(service: &QueryService, history_id: Uuid, label: &str) -> Result<()> {
    service.provide_feedback(history_id, label).await?;
    println!("Feedback '{}' recorded for {}", label.trim(), history_id);
    Ok(())
}

pub async fn history(service: &QueryService, session: &str, limit: usize) -> Result<()> {
    let records = service.list_history(session, limit).await?;
    if records.is_empty() {
        println!("No queries recorded for session '{}'", session);
        return Ok(());
    }
    for record in &records {
        println!("{}\n", format_history(record));
    }
    Ok(())
}

pub async fn suggest(service: &QueryService, partial: &str) -> Result<()> {
    for suggestion in service.suggestions(partial).await? {
        println!("{}", suggestion);
    }
    Ok(())
}

pub async fn related(service: &QueryService, name: &str) -> Result<()> {
    let related = service.related_entities(name).await?;
    if related.is_empty() {
        println!("No related entities for '{}'", name);
        return Ok(());
    }
    for r in related {
        println!(
            "{} -[{} {:.2}]-> {} ({})",
            name, r.relation.relationship_type, r.relation.strength, r.entity.name, r.entity.entity_type
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentChunk, Entity, EntityType, Scored};

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\n b   c", 10), "a b c");
        assert_eq!(preview("abcdef", 3), "abc...");
    }

    #[test]
    fn result_lists_sources_and_entities() {
        let doc = Uuid::new_v4();
        let result = QueryResult {
            history_id: Uuid::nil(),
            answer: "Rust is safe.".to_string(),
            used_chunks: vec![Scored::new(DocumentChunk::new(doc, 2, "Rust is\nsafe"), 0.91)],
            used_entities: vec![Entity::new("Rust", EntityType::Product, "")],
            response_time_ms: 12,
        };

        let text = format_result(&result);

        assert!(text.starts_with("Rust is safe.\n"));
        assert!(text.contains(&format!("[1] document {} chunk 2 (score 0.910): Rust is safe", doc)));
        assert!(text.contains("Entities: Rust"));
        assert!(text.contains("(12 ms)"));
    }
}
