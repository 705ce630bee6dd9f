//! Plain-text extraction from stored document bodies.

use quire_project::ContentKind;
use serde_json::Value;

/// Turns a stored body into the plain text that gets indexed.
///
/// Rich text is a JSON tree rooted at `root`; leaf `text` values are joined
/// with single spaces in document order. Bodies that fail to parse are
/// returned unchanged so that nothing becomes unsearchable.
pub fn extract_text_from_content(kind: ContentKind, body: &str) -> String {
    if body.is_empty() {
        return String::new();
    }
    match kind {
        ContentKind::RichText => match serde_json::from_str::<Value>(body) {
            Ok(value) => match value.get("root") {
                Some(root) => collect_rich_text(root),
                None => String::new(),
            },
            Err(_) => body.to_string(),
        },
        ContentKind::Drawing => match serde_json::from_str::<Value>(body) {
            Ok(value) => collect_drawing_text(&value),
            Err(_) => body.to_string(),
        },
        ContentKind::Diagram | ContentKind::PlainText => body.to_string(),
    }
}

fn collect_rich_text(root: &Value) -> String {
    let mut parts = Vec::new();
    push_rich_text(root, &mut parts);
    parts.join(" ")
}

fn push_rich_text<'a>(node: &'a Value, parts: &mut Vec<&'a str>) {
    if node.get("type").and_then(Value::as_str) == Some("text") {
        if let Some(text) = node.get("text").and_then(Value::as_str) {
            parts.push(text);
        }
        return;
    }
    if let Some(children) = node.get("children").and_then(Value::as_array) {
        for child in children {
            push_rich_text(child, parts);
        }
    }
}

fn collect_drawing_text(scene: &Value) -> String {
    scene
        .get("elements")
        .and_then(Value::as_array)
        .map(|elements| {
            elements
                .iter()
                .filter_map(|element| element.get("text").and_then(Value::as_str))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rich_text_leaves_are_joined_in_order() {
        let body = r#"{"root":{"type":"root","children":[
            {"type":"paragraph","children":[
                {"type":"text","text":"Here be"},
                {"type":"linebreak"},
                {"type":"text","text":"dragons"}
            ]},
            {"type":"paragraph","children":[{"type":"text","text":"again"}]}
        ]}}"#;
        assert_eq!(
            extract_text_from_content(ContentKind::RichText, body),
            "Here be dragons again"
        );
    }

    #[test]
    fn empty_document_yields_empty_text() {
        assert_eq!(extract_text_from_content(ContentKind::RichText, "{}"), "");
        assert_eq!(extract_text_from_content(ContentKind::RichText, ""), "");
    }

    #[test]
    fn invalid_json_falls_back_to_raw_body() {
        assert_eq!(
            extract_text_from_content(ContentKind::RichText, "just words"),
            "just words"
        );
    }

    #[test]
    fn drawing_elements_contribute_text() {
        let body = r#"{"elements":[{"type":"rect"},{"type":"text","text":"castle"},{"type":"text","text":"moat"}]}"#;
        assert_eq!(
            extract_text_from_content(ContentKind::Drawing, body),
            "castle moat"
        );
    }

    #[test]
    fn diagram_source_is_returned_verbatim() {
        let body = "graph TD; A-->B";
        assert_eq!(extract_text_from_content(ContentKind::Diagram, body), body);
    }
}
