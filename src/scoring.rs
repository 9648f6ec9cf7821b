//! Relevance scoring and snippet extraction.
//!
//! Pure functions shared by both search engines. Terms score per field as a
//! sum of match-kind bonuses scaled by log term frequency, weighted by the
//! field's importance; multi-term queries scale by the fraction of terms that
//! matched anywhere in the document; articles with a known publish date get a
//! bounded recency boost.

use chrono::{DateTime, Utc};

/// Queries shorter than this (after trimming) return empty results from both
/// engines. A precision floor, never an error.
pub const MIN_QUERY_LEN: usize = 2;

/// Sliding window width for snippet extraction, in words.
pub const SNIPPET_WINDOW_WORDS: usize = 30;
/// Hard cap on snippet length, in chars.
pub const SNIPPET_MAX_CHARS: usize = 240;

pub const WEIGHT_TITLE: f32 = 3.0;
pub const WEIGHT_DESCRIPTION: f32 = 2.0;
pub const WEIGHT_CONTENT: f32 = 1.5;
pub const WEIGHT_URL: f32 = 1.0;

const BONUS_SUBSTRING: f64 = 1.0;
const BONUS_WHOLE_WORD: f64 = 3.0;
const BONUS_AFFIX: f64 = 2.0;
const BONUS_PARTIAL: f64 = 0.5;

/// Maximum recency multiplier contribution (+10%).
const RECENCY_BOOST_MAX: f64 = 0.1;
const RECENCY_HALF_LIFE_SECS: f64 = 7.0 * 24.0 * 60.0 * 60.0;

/// Split on non-alphanumeric boundaries, lowercase, drop single-char tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Tokenize a query, applying the minimum-length floor first.
pub fn query_terms(query: &str) -> Vec<String> {
    let trimmed = query.trim();
    if trimmed.chars().count() < MIN_QUERY_LEN {
        return Vec::new();
    }
    tokenize(trimmed)
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}

/// Score one query term against one field.
///
/// Bonuses stack: a whole-word match is also a substring match, so a term
/// appearing as its own word scores 4.0 before the frequency scale. Affix is
/// mutually exclusive with whole-word (a word equal to the term is not a
/// strict prefix or suffix of it).
pub fn score_term(field_lower: &str, field_words: &[String], term: &str) -> f64 {
    let mut bonus = 0.0;
    let occurrences = count_occurrences(field_lower, term);
    if occurrences > 0 {
        bonus += BONUS_SUBSTRING;
    }
    if field_words.iter().any(|w| w == term) {
        bonus += BONUS_WHOLE_WORD;
    } else if field_words
        .iter()
        .any(|w| w.len() > term.len() && (w.starts_with(term) || w.ends_with(term)))
    {
        bonus += BONUS_AFFIX;
    }
    // Reverse containment: the term swallows a whole document word
    if field_words
        .iter()
        .any(|w| w.len() < term.len() && term.contains(w.as_str()))
    {
        bonus += BONUS_PARTIAL;
    }
    if bonus == 0.0 {
        return 0.0;
    }
    let tf = occurrences.max(1) as f64;
    bonus * (1.0 + tf.ln())
}

/// Score a document given its weighted fields. Multi-term queries scale the
/// total by `1 + matched_fraction` so documents covering more of the query
/// rise above documents repeating one term.
pub fn score_fields(fields: &[(&str, f32)], terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    let mut matched = vec![false; terms.len()];
    for (text, weight) in fields {
        if text.is_empty() {
            continue;
        }
        let lower = text.to_lowercase();
        let words = tokenize(&lower);
        for (i, term) in terms.iter().enumerate() {
            let s = score_term(&lower, &words, term);
            if s > 0.0 {
                matched[i] = true;
                total += s * *weight as f64;
            }
        }
    }
    if total == 0.0 {
        return 0.0;
    }
    if terms.len() > 1 {
        let fraction = matched.iter().filter(|m| **m).count() as f64 / terms.len() as f64;
        total *= 1.0 + fraction;
    }
    total
}

/// Recency multiplier: `1 + 0.1 * 2^(-age / half_life)`, half-life 7 days.
/// Articles without a publish date get no boost and no penalty.
pub fn recency_boost(published: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match published {
        Some(ts) => {
            let age_secs = (now - ts).num_seconds().max(0) as f64;
            let decay = (-age_secs * std::f64::consts::LN_2 / RECENCY_HALF_LIFE_SECS).exp();
            1.0 + RECENCY_BOOST_MAX * decay
        }
        None => 1.0,
    }
}

/// Extract the most term-dense window of the text as a snippet.
///
/// Slides a fixed-size word window, scoring each position by how many of its
/// words contain a query term; the best window is joined and truncated to
/// [`SNIPPET_MAX_CHARS`] with a `…` marker.
pub fn make_snippet(text: &str, terms: &[String]) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return String::new();
    }
    let window = SNIPPET_WINDOW_WORDS.min(words.len());

    let mut best_start = 0;
    let mut best_score = 0usize;
    if !terms.is_empty() {
        for start in 0..=(words.len() - window) {
            let score = words[start..start + window]
                .iter()
                .filter(|w| {
                    let lw = w.to_lowercase();
                    terms.iter().any(|t| lw.contains(t.as_str()))
                })
                .count();
            if score > best_score {
                best_score = score;
                best_start = start;
            }
        }
    }

    let mut snippet = words[best_start..best_start + window].join(" ");
    if snippet.chars().count() > SNIPPET_MAX_CHARS {
        snippet = snippet.chars().take(SNIPPET_MAX_CHARS).collect();
        snippet.push('…');
    } else if best_start + window < words.len() {
        snippet.push('…');
    }
    snippet
}
