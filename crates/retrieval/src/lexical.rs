//! In-memory BM25 lexical index
//!
//! Built per call over a bounded candidate set (one document's chunks or a
//! company's joined chunks). Rebuilding per request trades throughput for
//! correctness; candidate sets are bounded so the cost stays small.

use docsense_common::{AppError, ChunkRecord, Result};
use std::collections::HashMap;

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// A chunk ranked by the lexical index
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk: ChunkRecord,
    pub score: f64,
}

/// BM25 index over a fixed candidate set
#[derive(Debug)]
pub struct LexicalIndex {
    chunks: Vec<ChunkRecord>,
    /// term -> number of chunks containing it
    doc_freq: HashMap<String, usize>,
    /// per-chunk term frequencies, parallel to `chunks`
    term_freqs: Vec<HashMap<String, usize>>,
    /// per-chunk token counts, parallel to `chunks`
    lengths: Vec<usize>,
    avg_length: f64,
}

/// Lowercase alphanumeric terms, single-character tokens dropped
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

impl LexicalIndex {
    /// Build the index. Zero rows is an error condition that callers treat
    /// as a fallback trigger, never a silently empty index.
    pub fn build(chunks: Vec<ChunkRecord>) -> Result<Self> {
        if chunks.is_empty() {
            return Err(AppError::NoChunksFound {
                scope: "lexical index candidate set".to_string(),
            });
        }

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut term_freqs = Vec::with_capacity(chunks.len());
        let mut lengths = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            let tokens = tokenize(&chunk.content);
            lengths.push(tokens.len());

            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
        }

        let avg_length = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;

        Ok(Self {
            chunks,
            doc_freq,
            term_freqs,
            lengths,
            avg_length,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.chunks.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        // BM25+ style idf, floored at 0 so absent terms never score
        (((n - df + 0.5) / (df + 0.5)) + 1.0).ln().max(0.0)
    }

    fn score(&self, index: usize, query_terms: &[String]) -> f64 {
        let length = self.lengths[index] as f64;
        let freqs = &self.term_freqs[index];

        query_terms
            .iter()
            .map(|term| {
                let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                let norm = K1 * (1.0 - B + B * length / self.avg_length);
                self.idf(term) * (tf * (K1 + 1.0)) / (tf + norm)
            })
            .sum()
    }

    /// Rank candidates by BM25. Zero-score chunks are dropped; score ties
    /// keep insertion order (stable sort).
    pub fn search(&self, query: &str, top_k: usize) -> Vec<LexicalHit> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<LexicalHit> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let score = self.score(i, &query_terms);
                (score > 0.0).then(|| LexicalHit {
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }
}
