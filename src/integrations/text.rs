//! Raw bytes to plain text.
//!
//! Binary office formats (PDF, DOCX) are recognized by [`detect_mime`] but not
//! decoded here; plug in another [`TextExtractor`] to support them.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

static HTML_DROP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid html drop regex")
});
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid html tag regex"));
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").expect("valid blank line regex"));

/// Turns uploaded bytes into text the chunker can split.
pub trait TextExtractor: Send + Sync {
    /// Fails with `UnsupportedFormat` for MIME types it does not handle.
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String>;
}

/// Handles UTF-8 text formats: plain, Markdown, CSV, JSON and HTML.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn supports(mime_type: &str) -> bool {
        matches!(
            base_mime(mime_type),
            "text/plain" | "text/markdown" | "text/csv" | "application/json" | "text/html"
        )
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String> {
        if !Self::supports(mime_type) {
            return Err(Error::UnsupportedFormat(mime_type.to_string()));
        }

        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_start_matches('\u{feff}');

        Ok(match base_mime(mime_type) {
            "text/html" => strip_html(text),
            _ => text.to_string(),
        })
    }
}

fn base_mime(mime_type: &str) -> &str {
    mime_type.split(';').next().unwrap_or("").trim()
}

fn strip_html(html: &str) -> String {
    let without_scripts = HTML_DROP.replace_all(html, " ");
    let text = HTML_TAG.replace_all(&without_scripts, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&");
    BLANK_LINES.replace_all(text.trim(), "\n\n").into_owned()
}

/// MIME type from the file extension; unknown extensions map to
/// `application/octet-stream`.
pub fn detect_mime(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "text" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "docx" => MIME_DOCX,
        _ => "application/octet-stream",
    }
}
