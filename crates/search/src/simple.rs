//! Index-free substring search for as-you-type queries.

use std::collections::HashMap;

use quire_project::{Content, Node, NodeId, WorkspaceId};
use serde::Serialize;

use crate::excerpt::Excerpt;
use crate::extract::extract_text_from_content;
use crate::index::SearchOptions;

/// Where a simple-search hit matched first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Title,
    Body,
    Tags,
}

/// Result of [`simple_search`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimpleHit {
    pub node_id: NodeId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub field: MatchField,
    /// Character offset of the first match within `field`.
    pub position: usize,
    /// Heuristic relevance (exact title 100, title contains 50, +10 per body hit).
    pub score: u32,
    pub excerpt: Excerpt,
}

/// Case-insensitive containment scan over titles, bodies and tags.
///
/// Results are ordered by match position, earliest first; a title match
/// defines the position even when the body also matches. Ties are broken by
/// title length, then node id.
pub fn simple_search<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
    contents: impl IntoIterator<Item = &'a Content>,
    query: &str,
    options: &SearchOptions,
) -> Vec<SimpleHit> {
    let (needle, _) = fold_case(query.trim());
    if needle.is_empty() || options.limit == 0 {
        return Vec::new();
    }
    let bodies: HashMap<&NodeId, &Content> = contents
        .into_iter()
        .map(|content| (&content.node_id, content))
        .collect();

    let mut hits: Vec<SimpleHit> = nodes
        .into_iter()
        .filter(|node| match &options.workspace_id {
            Some(workspace_id) => &node.workspace_id == workspace_id,
            None => true,
        })
        .filter_map(|node| {
            let text = bodies
                .get(&node.id)
                .map(|content| extract_text_from_content(content.kind, &content.body))
                .unwrap_or_default();
            let tags = node.tags.iter().cloned().collect::<Vec<_>>().join(" ");

            let (field, position) = char_position(&node.title, &needle)
                .map(|pos| (MatchField::Title, pos))
                .or_else(|| char_position(&text, &needle).map(|pos| (MatchField::Body, pos)))
                .or_else(|| char_position(&tags, &needle).map(|pos| (MatchField::Tags, pos)))?;

            Some(SimpleHit {
                node_id: node.id.clone(),
                workspace_id: node.workspace_id.clone(),
                title: node.title.clone(),
                field,
                position,
                score: simple_score(&node.title, &text, &needle),
                excerpt: Excerpt::build(&text, &[needle.clone()], &options.excerpt),
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then_with(|| a.title.chars().count().cmp(&b.title.chars().count()))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    hits.truncate(options.limit);
    hits
}

/// Character offset of `needle` in the original `haystack`. Lowercasing can
/// expand a character (`İ` becomes two), so offsets are mapped back.
fn char_position(haystack: &str, needle: &str) -> Option<usize> {
    let (folded, origin) = fold_case(haystack);
    let byte_idx = folded.find(needle)?;
    let folded_idx = folded[..byte_idx].chars().count();
    origin.get(folded_idx).copied()
}

/// Lowercases char by char, recording the source char index of every output char.
fn fold_case(text: &str) -> (String, Vec<usize>) {
    let mut folded = String::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len());
    for (index, ch) in text.chars().enumerate() {
        for lower in ch.to_lowercase() {
            folded.push(lower);
            origin.push(index);
        }
    }
    (folded, origin)
}

fn simple_score(title: &str, text: &str, needle: &str) -> u32 {
    let (title, _) = fold_case(title);
    let mut score = if title == needle {
        100
    } else if title.contains(needle) {
        50
    } else {
        0
    };
    score += 10 * fold_case(text).0.matches(needle).count() as u32;
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_project::{NewNode, NodeKind, NodeStore};

    fn plain(store: &mut NodeStore, id: &str, title: &str, body: &str) {
        store
            .create_node(NewNode::new(id, "ws", NodeKind::File, title))
            .unwrap();
        let body = format!(
            r#"{{"root":{{"children":[{{"type":"text","text":"{body}"}}]}}}}"#
        );
        store
            .replace_content_body(&NodeId::from(id), body, 1)
            .unwrap();
    }

    fn ids(hits: &[SimpleHit]) -> Vec<String> {
        hits.iter().map(|hit| hit.node_id.to_string()).collect()
    }

    #[test]
    fn earlier_match_comes_first() {
        let mut store = NodeStore::new();
        plain(&mut store, "late", "Notes", "there is a dragon");
        plain(&mut store, "early", "Log", "dragon first");
        let hits = simple_search(store.nodes(), store.contents(), "DRAGON", &SearchOptions::default());
        assert_eq!(ids(&hits), vec!["early", "late"]);
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].field, MatchField::Body);
    }

    #[test]
    fn title_position_takes_precedence() {
        let mut store = NodeStore::new();
        plain(&mut store, "a", "About the dragon", "dragon at start");
        let hits = simple_search(store.nodes(), store.contents(), "dragon", &SearchOptions::default());
        assert_eq!(hits[0].field, MatchField::Title);
        assert_eq!(hits[0].position, 10);
        assert_eq!(hits[0].score, 60);
    }

    #[test]
    fn position_counts_characters_of_the_original_text() {
        let mut store = NodeStore::new();
        plain(&mut store, "a", "İİ dragon", "");
        plain(&mut store, "b", "Notes", "İzmir dragon");
        let hits = simple_search(store.nodes(), store.contents(), "dragon", &SearchOptions::default());
        assert_eq!(ids(&hits), vec!["a", "b"]);
        assert_eq!(hits[0].position, 3);
        assert_eq!(hits[1].field, MatchField::Body);
        assert_eq!(hits[1].position, 6);
    }

    #[test]
    fn ties_prefer_shorter_titles() {
        let mut store = NodeStore::new();
        plain(&mut store, "long", "dragon lair", "");
        plain(&mut store, "short", "dragon", "");
        let hits = simple_search(store.nodes(), store.contents(), "dragon", &SearchOptions::default());
        assert_eq!(ids(&hits), vec!["short", "long"]);
        assert_eq!(hits[0].score, 100);
    }

    #[test]
    fn tags_match_and_workspace_filters() {
        let mut store = NodeStore::new();
        store
            .create_node(NewNode::new("t", "ws", NodeKind::Canvas, "Sketch").with_tag("castle"))
            .unwrap();
        store
            .create_node(NewNode::new("x", "other", NodeKind::File, "castle"))
            .unwrap();
        let options = SearchOptions::default().in_workspace("ws");
        let hits = simple_search(store.nodes(), store.contents(), "cast", &options);
        assert_eq!(ids(&hits), vec!["t"]);
        assert_eq!(hits[0].field, MatchField::Tags);
    }

    #[test]
    fn blank_query_is_empty() {
        let store = NodeStore::new();
        assert!(simple_search(store.nodes(), store.contents(), "  ", &SearchOptions::default()).is_empty());
    }
}
