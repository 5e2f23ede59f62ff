//! Text helpers shared by the extractor and the matcher
//!
//! The identifier filter here is the authoritative gate for extracted
//! references; the extraction prompt asks for the same discipline but the
//! filter is enforced in code regardless of what the model returns.

use docsense_common::ChunkRecord;
use regex_lite::Regex;
use std::sync::OnceLock;

fn identifier_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)^(exhibit|schedule|attachment|addendum|appendix)\s+[a-z0-9]+$").unwrap(),
            Regex::new(r"(?i)^[a-z]+\s+(exhibit|schedule|attachment|addendum|appendix)$").unwrap(),
            Regex::new(r"(?i)^(section|clause|article)\s+[0-9]+(\.[0-9]+)*$").unwrap(),
        ]
    })
}

/// True when a reference name carries a specific document identifier
/// ("Exhibit A", "Schedule 12") rather than a vague mention
pub fn has_specific_identifier(document_name: &str) -> bool {
    let trimmed = document_name.trim();
    identifier_patterns().iter().any(|p| p.is_match(trimmed))
}

/// Extract the identifier token from a reference name, e.g. "a" from
/// "Exhibit A" or "12" from "Schedule 12"
pub fn extract_identifier(document_name: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"(?i)\b([a-z]\d*|\d+[a-z]*)\b").unwrap());
    pattern
        .captures(document_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// True when content mentions any generic reference keyword
pub fn has_reference_keyword(content: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(exhibit|schedule|attachment|addendum|appendix|refer|see|per)\b").unwrap()
    });
    pattern.is_match(content)
}

/// Lowercase alphanumeric normalization used for title comparison
pub fn clean_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_length.saturating_sub(3)).collect();
    format!("{cut}...")
}

/// Render a document's chunks as one page-annotated block for the
/// extraction prompt
pub fn group_content_from_chunks(chunks: &[ChunkRecord]) -> String {
    chunks
        .iter()
        .map(|c| format!("=== Page {} ===\n{}", c.page, c.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
