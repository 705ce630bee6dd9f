//! Workspace export to JSON, Markdown and Org documents.
//! 將工作區匯出為 JSON、Markdown 與 Org 文件。
//!
//! Nodes are emitted in tree order with every folder expanded. Document
//! bodies are reduced to plain text first, so the output never depends on
//! the editor's storage format.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use quire_project::{flatten_tree, NodeId, NodeKind, NodeStore, WorkspaceId};
use quire_search::extract_text_from_content;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

const MAX_MARKDOWN_HEADING: usize = 6;

/// 匯出格式。 / Output format of an export.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    Org,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
            ExportFormat::Org => "org",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "markdown",
            ExportFormat::Org => "org",
        };
        f.write_str(name)
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "org" | "orgmode" => Ok(ExportFormat::Org),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unknown export format: {0}")]
    UnknownFormat(String),
    #[error("node {0} is not part of workspace {1}")]
    NotFound(NodeId, WorkspaceId),
    #[error("failed to encode export: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 匯出清單中的一列。 / One node of an export, in tree order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExportEntry {
    pub id: NodeId,
    pub title: String,
    pub kind: NodeKind,
    /// Depth below the export root; the root's own level is 0.
    pub depth: usize,
    pub tags: Vec<String>,
    /// Plain text of the body; absent for folders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Serialize)]
struct JsonExport<'a> {
    workspace: &'a WorkspaceId,
    nodes: &'a [ExportEntry],
}

/// 依樹狀順序收集節點與純文字內容。
/// / Collects the workspace, or the subtree at `root`, in tree order.
pub fn collect_entries(
    store: &NodeStore,
    workspace_id: &WorkspaceId,
    root: Option<&NodeId>,
) -> Result<Vec<ExportEntry>, ExportError> {
    let forest = store.forest(workspace_id);
    let expanded: HashSet<NodeId> = store
        .nodes_in_workspace(workspace_id)
        .into_iter()
        .filter(|node| node.is_folder())
        .map(|node| node.id.clone())
        .collect();
    let rows: Vec<_> = flatten_tree(&forest, &expanded).collect();

    let (start, base_depth) = match root {
        Some(root_id) => {
            let index = rows
                .iter()
                .position(|row| &row.node.id == root_id)
                .ok_or_else(|| ExportError::NotFound(root_id.clone(), workspace_id.clone()))?;
            (index, rows[index].depth)
        }
        None => (0, 0),
    };
    let end = match root {
        Some(_) => rows[start + 1..]
            .iter()
            .position(|row| row.depth <= base_depth)
            .map_or(rows.len(), |offset| start + 1 + offset),
        None => rows.len(),
    };

    let entries = rows[start..end]
        .iter()
        .map(|row| {
            let node = row.node;
            let text = store
                .content(&node.id)
                .filter(|_| node.kind.needs_content())
                .map(|content| extract_text_from_content(content.kind, &content.body));
            ExportEntry {
                id: node.id.clone(),
                title: node.title.clone(),
                kind: node.kind,
                depth: row.depth - base_depth,
                tags: node.tags.iter().cloned().collect(),
                text,
            }
        })
        .collect::<Vec<_>>();
    debug!(workspace = %workspace_id, nodes = entries.len(), "collected export entries");
    Ok(entries)
}

/// 將節點清單輸出為指定格式。 / Renders collected entries in `format`.
pub fn render(
    workspace_id: &WorkspaceId,
    entries: &[ExportEntry],
    format: ExportFormat,
) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => {
            let document = JsonExport {
                workspace: workspace_id,
                nodes: entries,
            };
            Ok(serde_json::to_string_pretty(&document)?)
        }
        ExportFormat::Markdown => Ok(join_blocks(entries.iter().map(markdown_block))),
        ExportFormat::Org => Ok(join_blocks(entries.iter().map(org_block))),
    }
}

/// Collects and renders in one step.
pub fn export_workspace(
    store: &NodeStore,
    workspace_id: &WorkspaceId,
    root: Option<&NodeId>,
    format: ExportFormat,
) -> Result<String, ExportError> {
    let entries = collect_entries(store, workspace_id, root)?;
    render(workspace_id, &entries, format)
}

fn join_blocks(blocks: impl Iterator<Item = String>) -> String {
    let mut output = blocks.collect::<Vec<_>>().join("\n\n");
    if !output.is_empty() {
        output.push('\n');
    }
    output
}

fn body_text(entry: &ExportEntry) -> Option<&str> {
    entry
        .text
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn markdown_block(entry: &ExportEntry) -> String {
    let level = (entry.depth + 1).min(MAX_MARKDOWN_HEADING);
    let mut block = format!("{} {}", "#".repeat(level), entry.title);
    if !entry.tags.is_empty() {
        let tags: Vec<String> = entry.tags.iter().map(|tag| format!("#{}", tag_word(tag))).collect();
        block.push_str("\n\n");
        block.push_str(&tags.join(" "));
    }
    if let Some(text) = body_text(entry) {
        block.push_str("\n\n");
        block.push_str(text);
    }
    block
}

fn org_block(entry: &ExportEntry) -> String {
    let mut block = format!("{} {}", "*".repeat(entry.depth + 1), entry.title);
    if !entry.tags.is_empty() {
        let tags: Vec<String> = entry.tags.iter().map(|tag| tag_word(tag)).collect();
        block.push_str(&format!(" :{}:", tags.join(":")));
    }
    if let Some(text) = body_text(entry) {
        block.push('\n');
        block.push_str(text);
    }
    block
}

/// Tags become single words in both markup formats.
fn tag_word(tag: &str) -> String {
    tag.split_whitespace().collect::<Vec<_>>().join("_")
}
