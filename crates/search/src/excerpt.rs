//! Excerpt and highlight generation for search hits.

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::SearchError;

/// Controls how excerpts are cut and marked up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExcerptOptions {
    /// Characters of context shown around the first match (split evenly).
    pub context_chars: usize,
    /// Characters of context on each side of a highlight snippet.
    pub highlight_context_chars: usize,
    pub max_highlights: usize,
    pub open_marker: String,
    pub close_marker: String,
}

impl Default for ExcerptOptions {
    fn default() -> Self {
        Self {
            context_chars: 100,
            highlight_context_chars: 20,
            max_highlights: 3,
            open_marker: "<mark>".to_string(),
            close_marker: "</mark>".to_string(),
        }
    }
}

/// Excerpt attached to a search hit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Excerpt {
    /// Context window with every matched term wrapped in markers.
    pub text: String,
    /// Short plain snippets around the first few matches.
    pub highlights: Vec<String>,
}

impl Excerpt {
    pub fn build(text: &str, terms: &[String], options: &ExcerptOptions) -> Self {
        match build_term_regex(terms) {
            Ok(Some(pattern)) => Self {
                text: generate_excerpt(text, &pattern, options),
                highlights: extract_highlights(text, &pattern, options),
            },
            _ => Self {
                text: leading_excerpt(text, options.context_chars),
                highlights: Vec::new(),
            },
        }
    }
}

/// Builds a case-insensitive alternation over the literal terms, longest
/// first so that overlapping terms mark the widest span.
pub fn build_term_regex(terms: &[String]) -> Result<Option<Regex>, SearchError> {
    let mut literals: Vec<&str> = terms
        .iter()
        .map(String::as_str)
        .filter(|term| !term.is_empty())
        .collect();
    if literals.is_empty() {
        return Ok(None);
    }
    literals.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    literals.dedup();
    let source = literals
        .iter()
        .map(|term| regex::escape(term))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|err| SearchError::InvalidPattern(err.to_string()))
}

/// Cuts a window of `context_chars` around the first match and marks every
/// match that lies fully inside it. Without a match the start of the text is
/// returned.
pub fn generate_excerpt(text: &str, pattern: &Regex, options: &ExcerptOptions) -> String {
    let Some(first) = pattern.find(text) else {
        return leading_excerpt(text, options.context_chars);
    };
    let half = options.context_chars / 2;
    let start = step_back(text, first.start(), half);
    let end = step_forward(text, first.end(), half);

    let mut excerpt = String::new();
    if start > 0 {
        excerpt.push_str("...");
    }
    let mut cursor = start;
    for found in pattern.find_iter(&text[start..end]) {
        let match_start = start + found.start();
        let match_end = start + found.end();
        excerpt.push_str(&text[cursor..match_start]);
        excerpt.push_str(&options.open_marker);
        excerpt.push_str(&text[match_start..match_end]);
        excerpt.push_str(&options.close_marker);
        cursor = match_end;
    }
    excerpt.push_str(&text[cursor..end]);
    if end < text.len() {
        excerpt.push_str("...");
    }
    excerpt
}

/// Short snippets around up to `max_highlights` matches.
pub fn extract_highlights(text: &str, pattern: &Regex, options: &ExcerptOptions) -> Vec<String> {
    pattern
        .find_iter(text)
        .take(options.max_highlights)
        .map(|found| {
            let start = step_back(text, found.start(), options.highlight_context_chars);
            let end = step_forward(text, found.end(), options.highlight_context_chars);
            text[start..end].to_string()
        })
        .collect()
}

fn leading_excerpt(text: &str, context_chars: usize) -> String {
    let end = step_forward(text, 0, context_chars);
    if end < text.len() {
        format!("{}...", &text[..end])
    } else {
        text.to_string()
    }
}

/// Byte offset `chars` characters before `from`, clamped to the start.
fn step_back(text: &str, from: usize, chars: usize) -> usize {
    if chars == 0 {
        return from;
    }
    text[..from]
        .char_indices()
        .rev()
        .nth(chars - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

/// Byte offset `chars` characters after `from`, clamped to the end.
fn step_forward(text: &str, from: usize, chars: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(chars)
        .map(|(idx, _)| from + idx)
        .unwrap_or(text.len())
}
