//! Keyword scoring that works without any embeddings.
//!
//! The score is a token-overlap count. A query token counts when it is in the document's
//! token set or when it appears as a substring of the raw lowercase title or excerpt, so
//! partial and compound-word matches still register.

use crate::models::{Document, QueryResult};
use std::collections::HashSet;

const MIN_TOKEN_LEN: usize = 3;

/// Lowercases, splits on anything outside `[a-z0-9]`, and drops tokens shorter than 3 chars.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_ascii_lowercase() || ch.is_ascii_digit()))
        .filter(|token| token.len() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

/// Overlap score of pre-tokenized query terms against one document.
pub fn score(query_tokens: &[String], document: &Document) -> u32 {
    let title = document.title.to_lowercase();
    let excerpt = document.excerpt.to_lowercase();
    let token_set: HashSet<String> = tokenize(&format!("{} {}", document.title, document.excerpt))
        .into_iter()
        .collect();

    query_tokens
        .iter()
        .filter(|token| {
            token_set.contains(token.as_str())
                || title.contains(token.as_str())
                || excerpt.contains(token.as_str())
        })
        .count() as u32
}

pub fn lexical_results(corpus: &[Document], query: &str, top_k: usize) -> Vec<QueryResult> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return corpus
            .iter()
            .take(top_k)
            .map(|document| QueryResult::from_document(document, 0.0))
            .collect();
    }

    let mut scored: Vec<(&Document, u32)> = corpus
        .iter()
        .map(|document| (document, score(&query_tokens, document)))
        .collect();

    scored.sort_by(|(left_doc, left_score), (right_doc, right_score)| {
        right_score
            .cmp(left_score)
            .then_with(|| left_doc.title.cmp(&right_doc.title))
    });

    scored
        .into_iter()
        .take(top_k)
        .map(|(document, score)| QueryResult::from_document(document, f64::from(score)))
        .collect()
}
