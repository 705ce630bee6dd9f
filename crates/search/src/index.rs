//! Weighted inverted index over node titles, tags and extracted body text.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

use once_cell::sync::Lazy;
use quire_project::{Content, Node, NodeId, NodeKind, NodeStore, WorkspaceId};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::excerpt::{Excerpt, ExcerptOptions};
use crate::extract::extract_text_from_content;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}_]+").expect("token pattern is valid"));

const PREFIX_FACTOR: f64 = 0.5;
const FUZZY_FACTOR: f64 = 0.3;
const FUZZY_MIN_LEN: usize = 4;

/// Splits text into lowercase word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN
        .find_iter(text)
        .map(|token| token.as_str().to_lowercase())
        .collect()
}

/// Per-field multipliers applied to term frequency.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldWeights {
    pub title: f64,
    pub tags: f64,
    pub body: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            title: 10.0,
            tags: 5.0,
            body: 1.0,
        }
    }
}

/// Query-time options for [`SearchIndex::search`].
#[derive(Clone, Debug, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    /// Enables edit-distance-1 matching for longer terms.
    pub fuzzy: bool,
    pub workspace_id: Option<WorkspaceId>,
    pub excerpt: ExcerptOptions,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            fuzzy: true,
            workspace_id: None,
            excerpt: ExcerptOptions::default(),
        }
    }
}

impl SearchOptions {
    pub fn in_workspace(mut self, workspace_id: impl Into<WorkspaceId>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A ranked search result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub node_id: NodeId,
    pub workspace_id: WorkspaceId,
    pub kind: NodeKind,
    pub title: String,
    pub score: f64,
    pub excerpt: Excerpt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    Title,
    Tags,
    Body,
}

#[derive(Clone, Debug)]
struct Posting {
    doc: usize,
    field: Field,
    frequency: u32,
}

#[derive(Clone, Debug)]
struct IndexedDocument {
    node_id: NodeId,
    workspace_id: WorkspaceId,
    kind: NodeKind,
    title: String,
    text: String,
}

/// Rebuildable inverted index. Never authoritative: discard and rebuild it
/// whenever nodes or contents change.
#[derive(Clone, Debug, Default)]
pub struct SearchIndex {
    weights: FieldWeights,
    documents: Vec<IndexedDocument>,
    postings: BTreeMap<String, Vec<Posting>>,
}

impl SearchIndex {
    /// Indexes every non-folder node. Documents are added in id order so two
    /// builds over the same input are identical.
    pub fn build<'a>(
        nodes: impl IntoIterator<Item = &'a Node>,
        contents: impl IntoIterator<Item = &'a Content>,
        weights: FieldWeights,
    ) -> Self {
        let bodies: HashMap<&NodeId, &Content> = contents
            .into_iter()
            .map(|content| (&content.node_id, content))
            .collect();
        let mut nodes: Vec<&Node> = nodes.into_iter().filter(|node| !node.is_folder()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut index = Self {
            weights,
            documents: Vec::with_capacity(nodes.len()),
            postings: BTreeMap::new(),
        };
        for node in nodes {
            let text = bodies
                .get(&node.id)
                .map(|content| extract_text_from_content(content.kind, &content.body))
                .unwrap_or_default();
            let doc = index.documents.len();
            index.add_field(doc, Field::Title, &node.title);
            for tag in &node.tags {
                index.add_field(doc, Field::Tags, tag);
            }
            index.add_field(doc, Field::Body, &text);
            index.documents.push(IndexedDocument {
                node_id: node.id.clone(),
                workspace_id: node.workspace_id.clone(),
                kind: node.kind,
                title: node.title.clone(),
                text,
            });
        }
        debug!(
            documents = index.documents.len(),
            terms = index.postings.len(),
            "search index built"
        );
        index
    }

    pub fn from_store(store: &NodeStore, weights: FieldWeights) -> Self {
        Self::build(store.nodes(), store.contents(), weights)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn weights(&self) -> FieldWeights {
        self.weights
    }

    fn add_field(&mut self, doc: usize, field: Field, text: &str) {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_default() += 1;
        }
        for (term, frequency) in counts {
            let postings = self.postings.entry(term).or_default();
            match postings
                .iter_mut()
                .find(|posting| posting.doc == doc && posting.field == field)
            {
                Some(posting) => posting.frequency += frequency,
                None => postings.push(Posting {
                    doc,
                    field,
                    frequency,
                }),
            }
        }
    }

    fn weight(&self, field: Field) -> f64 {
        match field {
            Field::Title => self.weights.title,
            Field::Tags => self.weights.tags,
            Field::Body => self.weights.body,
        }
    }

    /// Index terms matched by `query_term`, each with its match factor.
    fn expand_term<'a>(&'a self, query_term: &'a str, fuzzy: bool) -> Vec<(&'a str, f64)> {
        let mut matched = Vec::new();
        if self.postings.contains_key(query_term) {
            matched.push((query_term, 1.0));
        }
        let after = (Bound::Excluded(query_term), Bound::Unbounded);
        for (term, _) in self
            .postings
            .range::<str, _>(after)
            .take_while(|(term, _)| term.starts_with(query_term))
        {
            matched.push((term.as_str(), PREFIX_FACTOR));
        }
        let query_chars: Vec<char> = query_term.chars().collect();
        if fuzzy && query_chars.len() >= FUZZY_MIN_LEN {
            for term in self.postings.keys() {
                if term == query_term || term.starts_with(query_term) {
                    continue;
                }
                let term_chars: Vec<char> = term.chars().collect();
                if within_one_edit(&query_chars, &term_chars) {
                    matched.push((term.as_str(), FUZZY_FACTOR));
                }
            }
        }
        matched
    }

    /// Ranks documents by `Σ frequency × field weight × match factor`.
    /// Ties are broken by case-insensitive title, then node id.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Vec<SearchHit> {
        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();
        if query_terms.is_empty() || options.limit == 0 {
            return Vec::new();
        }

        let mut scores: HashMap<usize, f64> = HashMap::new();
        let mut highlight_terms: HashSet<&str> = HashSet::new();
        for query_term in &query_terms {
            for (term, factor) in self.expand_term(query_term, options.fuzzy) {
                let Some(postings) = self.postings.get(term) else {
                    continue;
                };
                highlight_terms.insert(term);
                for posting in postings {
                    let document = &self.documents[posting.doc];
                    if let Some(workspace_id) = &options.workspace_id {
                        if &document.workspace_id != workspace_id {
                            continue;
                        }
                    }
                    *scores.entry(posting.doc).or_default() +=
                        f64::from(posting.frequency) * self.weight(posting.field) * factor;
                }
            }
        }

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().collect();
        ranked.sort_by(|(a_doc, a_score), (b_doc, b_score)| {
            let a = &self.documents[*a_doc];
            let b = &self.documents[*b_doc];
            b_score
                .total_cmp(a_score)
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        ranked.truncate(options.limit);

        let mut terms: Vec<String> = highlight_terms.into_iter().map(str::to_string).collect();
        terms.sort();
        ranked
            .into_iter()
            .map(|(doc, score)| {
                let document = &self.documents[doc];
                SearchHit {
                    node_id: document.node_id.clone(),
                    workspace_id: document.workspace_id.clone(),
                    kind: document.kind,
                    title: document.title.clone(),
                    score,
                    excerpt: Excerpt::build(&document.text, &terms, &options.excerpt),
                }
            })
            .collect()
    }
}

/// True when `a` and `b` differ by at most one insertion, deletion or substitution.
fn within_one_edit(a: &[char], b: &[char]) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if long.len() - short.len() > 1 {
        return false;
    }
    let mut i = 0;
    let mut j = 0;
    let mut edits = 0;
    while i < short.len() && j < long.len() {
        if short[i] == long[j] {
            i += 1;
            j += 1;
            continue;
        }
        edits += 1;
        if edits > 1 {
            return false;
        }
        if short.len() == long.len() {
            i += 1;
        }
        j += 1;
    }
    edits + (long.len() - j) + (short.len() - i) <= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_project::{ContentKind, NewNode};

    fn rich(text: &str) -> String {
        format!(
            r#"{{"root":{{"children":[{{"type":"paragraph","children":[{{"type":"text","text":"{text}"}}]}}]}}}}"#
        )
    }

    fn store_with(docs: &[(&str, &str, &str)]) -> NodeStore {
        let mut store = NodeStore::new();
        for (id, title, body) in docs {
            store
                .create_node(NewNode::new(*id, "ws", NodeKind::File, *title))
                .unwrap();
            store
                .replace_content_body(&NodeId::from(*id), rich(body), 1)
                .unwrap();
        }
        store
    }

    fn ids(hits: &[SearchHit]) -> Vec<String> {
        hits.iter().map(|hit| hit.node_id.to_string()).collect()
    }

    #[test]
    fn title_weight_beats_repeated_body_terms() {
        let store = store_with(&[
            ("doc1", "Dragon", "nothing to see"),
            ("doc2", "Notes", "dragon dragon dragon"),
        ]);
        let index = SearchIndex::from_store(&store, FieldWeights::default());
        let hits = index.search("dragon", &SearchOptions::default());
        assert_eq!(ids(&hits), vec!["doc1", "doc2"]);
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[1].score, 3.0);
    }

    #[test]
    fn ties_are_broken_by_title_case_insensitively() {
        let store = store_with(&[
            ("b", "beta", "castle"),
            ("a", "Alpha", "castle"),
            ("c", "gamma", "castle"),
        ]);
        let index = SearchIndex::from_store(&store, FieldWeights::default());
        let hits = index.search("castle", &SearchOptions::default());
        let titles: Vec<_> = hits.iter().map(|hit| hit.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn prefix_and_fuzzy_matches_score_lower_than_exact() {
        let store = store_with(&[
            ("exact", "x", "dragon"),
            ("prefix", "y", "dragonfly"),
            ("typo", "z", "dragn"),
        ]);
        let index = SearchIndex::from_store(&store, FieldWeights::default());
        let hits = index.search("dragon", &SearchOptions::default());
        assert_eq!(ids(&hits), vec!["exact", "prefix", "typo"]);
        assert_eq!(hits[1].score, 0.5);
        assert!((hits[2].score - 0.3).abs() < 1e-9);

        let strict = SearchOptions {
            fuzzy: false,
            ..SearchOptions::default()
        };
        assert_eq!(ids(&index.search("dragon", &strict)), vec!["exact", "prefix"]);
    }

    #[test]
    fn folders_are_not_indexed_and_tags_are() {
        let mut store = NodeStore::new();
        store
            .create_node(NewNode::new("f", "ws", NodeKind::Folder, "Dragons"))
            .unwrap();
        store
            .create_node(NewNode::new("d", "ws", NodeKind::Diary, "Monday").with_tag("dragon"))
            .unwrap();
        let index = SearchIndex::from_store(&store, FieldWeights::default());
        assert_eq!(index.len(), 1);
        let hits = index.search("dragon", &SearchOptions::default());
        assert_eq!(ids(&hits), vec!["d"]);
        assert_eq!(hits[0].score, 5.0);
    }

    #[test]
    fn workspace_filter_and_limit_apply() {
        let mut store = store_with(&[("a", "castle", ""), ("b", "castle two", "")]);
        store
            .create_node(NewNode::new("other", "elsewhere", NodeKind::File, "castle"))
            .unwrap();
        let index = SearchIndex::from_store(&store, FieldWeights::default());
        let hits = index.search("castle", &SearchOptions::default().in_workspace("ws"));
        assert_eq!(hits.len(), 2);
        let hits = index.search("castle", &SearchOptions::default().with_limit(1));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let store = store_with(&[("a", "One", "alpha beta"), ("b", "Two", "beta gamma")]);
        let first = SearchIndex::from_store(&store, FieldWeights::default());
        let second = SearchIndex::from_store(&store, FieldWeights::default());
        let options = SearchOptions::default();
        assert_eq!(first.search("beta", &options), second.search("beta", &options));
    }

    #[test]
    fn hits_carry_marked_excerpts() {
        let store = store_with(&[("a", "Lair", "the dragon sleeps")]);
        let index = SearchIndex::from_store(&store, FieldWeights::default());
        let hits = index.search("Dragon", &SearchOptions::default());
        assert_eq!(hits[0].excerpt.text, "the <mark>dragon</mark> sleeps");
    }

    #[test]
    fn blank_query_returns_nothing() {
        let store = store_with(&[("a", "Lair", "the dragon sleeps")]);
        let index = SearchIndex::from_store(&store, FieldWeights::default());
        assert!(index.search("   ", &SearchOptions::default()).is_empty());
    }

    #[test]
    fn plain_text_content_is_indexed_verbatim() {
        let mut store = NodeStore::new();
        store
            .create_node(NewNode::new("p", "ws", NodeKind::File, "Plain"))
            .unwrap();
        let content = Content {
            node_id: NodeId::from("p"),
            kind: ContentKind::PlainText,
            body: "griffin".into(),
            version: 1,
        };
        let node = store.node(&NodeId::from("p")).unwrap().clone();
        let index = SearchIndex::build([&node], [&content], FieldWeights::default());
        assert_eq!(index.search("griffin", &SearchOptions::default()).len(), 1);
    }

    #[test]
    fn edit_distance_check() {
        let chars = |s: &str| s.chars().collect::<Vec<_>>();
        assert!(within_one_edit(&chars("dragon"), &chars("dragn")));
        assert!(within_one_edit(&chars("dragon"), &chars("dragon")));
        assert!(within_one_edit(&chars("dragon"), &chars("drakon")));
        assert!(within_one_edit(&chars("dragon"), &chars("dragons")));
        assert!(!within_one_edit(&chars("dragon"), &chars("drgn")));
        assert!(!within_one_edit(&chars("dragon"), &chars("wagon")));
    }
}
