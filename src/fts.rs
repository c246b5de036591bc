//! Full-text tokenizer and FTS5 query helpers.
//!
//! Tokenization runs case-folding, NFKD diacritic stripping, Unicode
//! word-boundary splitting, and length/stop-word filtering before a token
//! ever reaches the `fts_index` virtual table, so `fts:match` sees the same
//! normalized text on both the index and query sides.

use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
    "it", "its", "of", "on", "that", "the", "to", "was", "were", "will", "with",
];

pub struct Tokenizer {
    min_token_len: usize,
    max_token_len: usize,
    stopwords: HashSet<&'static str>,
}

impl Tokenizer {
    pub fn new(min_token_len: usize, max_token_len: usize, stopword_language: &str) -> Self {
        let stopwords = if stopword_language == "en" {
            ENGLISH_STOPWORDS.iter().copied().collect()
        } else {
            HashSet::new()
        };
        Self {
            min_token_len,
            max_token_len,
            stopwords,
        }
    }

    /// Case-fold, NFKD-normalize and strip combining diacritics, split on
    /// Unicode word boundaries, then drop tokens outside the configured
    /// length range or present in the stop-word list.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let folded = text.to_lowercase();
        let stripped: String = folded.nfkd().filter(|c| !is_combining_mark(*c)).collect();

        stripped
            .unicode_words()
            .filter(|w| {
                let len = w.chars().count();
                len >= self.min_token_len && len <= self.max_token_len
            })
            .filter(|w| !self.stopwords.contains(w))
            .map(str::to_string)
            .collect()
    }
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32,
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Builds the FTS5 MATCH expression for a phrase-agnostic multi-token query:
/// tokens are ANDed together, matching spec's `fts:match` semantics (every
/// token must occur, no phrase ordering implied).
pub fn match_expression(tokenizer: &Tokenizer, query: &str) -> String {
    tokenizer
        .tokenize(query)
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// SQL fragment for `fts:snippet(subject, property, query, begin, end, max_chars)`.
/// Delegates to SQLite's built-in `snippet()` function rather than
/// re-walking token offsets in Rust.
pub fn snippet_sql(begin_tag: &str, end_tag: &str, max_tokens: u32) -> String {
    format!(
        "snippet(fts_index, 2, '{}', '{}', '...', {})",
        begin_tag.replace('\'', "''"),
        end_tag.replace('\'', "''"),
        max_tokens
    )
}

/// SQL fragment for `fts:offsets(subject, property, query)`.
pub fn offsets_sql() -> &'static str {
    "offsets(fts_index)"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_folds_case_and_strips_diacritics() {
        let t = Tokenizer::new(2, 64, "en");
        let tokens = t.tokenize("Café RÉSUMÉ");
        assert_eq!(tokens, vec!["cafe", "resume"]);
    }

    #[test]
    fn tokenize_drops_short_tokens_and_stopwords() {
        let t = Tokenizer::new(2, 64, "en");
        let tokens = t.tokenize("the cat sat on a mat");
        assert_eq!(tokens, vec!["cat", "sat", "mat"]);
    }

    #[test]
    fn tokenize_drops_overlong_tokens() {
        let t = Tokenizer::new(2, 5, "en");
        let tokens = t.tokenize("short extraordinarily");
        assert_eq!(tokens, vec!["short"]);
    }

    #[test]
    fn match_expression_ands_tokens() {
        let t = Tokenizer::new(2, 64, "en");
        assert_eq!(match_expression(&t, "quick brown fox"), "\"quick\" AND \"brown\" AND \"fox\"");
    }
}
