//! Full-text search over Quire workspace documents.
//!
//! Stored bodies are reduced to plain text (`extract`), indexed with per-field
//! weights (`index`) and returned with highlighted excerpts (`excerpt`). The
//! `simple` module offers an index-free scan for as-you-type queries.

use thiserror::Error;

pub mod excerpt;
pub mod extract;
pub mod index;
pub mod simple;

pub use excerpt::{Excerpt, ExcerptOptions};
pub use extract::extract_text_from_content;
pub use index::{tokenize, FieldWeights, SearchHit, SearchIndex, SearchOptions};
pub use simple::{simple_search, MatchField, SimpleHit};

/// Error conditions raised by the search engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}
