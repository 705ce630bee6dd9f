use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier assigned to a node by the caller or backend.
/// 由呼叫端或後端指派的節點識別碼。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Stable identifier for workspaces.
/// 工作區的穩定代號。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The kind of workspace node.
/// 工作區節點的類型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
    Diary,
    Canvas,
}

impl NodeKind {
    pub fn is_folder(self) -> bool {
        matches!(self, NodeKind::Folder)
    }

    /// Every kind except folders owns exactly one content record.
    /// 除資料夾外，每種節點都擁有一筆內容紀錄。
    pub fn needs_content(self) -> bool {
        !self.is_folder()
    }

    /// Content flavour created for a fresh node of this kind.
    /// 新節點預設使用的內容格式。
    pub fn default_content_kind(self) -> Option<ContentKind> {
        match self {
            NodeKind::Folder => None,
            NodeKind::File | NodeKind::Diary => Some(ContentKind::RichText),
            NodeKind::Canvas => Some(ContentKind::Drawing),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Folder => "folder",
            NodeKind::Diary => "diary",
            NodeKind::Canvas => "canvas",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single entry of the workspace tree. Parent links are ids, never references.
/// 工作區樹中的單一節點；父節點僅以識別碼表示。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub workspace_id: WorkspaceId,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    pub kind: NodeKind,
    pub title: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
}

impl Node {
    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    /// Key of the sibling group this node belongs to.
    /// 此節點所屬的兄弟群組鍵值。
    pub fn sibling_key(&self) -> SiblingKey {
        SiblingKey {
            workspace_id: self.workspace_id.clone(),
            parent_id: self.parent_id.clone(),
        }
    }
}

/// All nodes sharing the same `(workspace, parent)` pair.
/// 共用相同 `(工作區, 父節點)` 的節點集合。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiblingKey {
    pub workspace_id: WorkspaceId,
    pub parent_id: Option<NodeId>,
}

impl SiblingKey {
    pub fn new(workspace_id: WorkspaceId, parent_id: Option<NodeId>) -> Self {
        Self {
            workspace_id,
            parent_id,
        }
    }
}

/// Request payload for [`crate::NodeStore::create_node`].
/// 建立節點時使用的草稿。
#[derive(Debug, Clone)]
pub struct NewNode {
    pub id: NodeId,
    pub workspace_id: WorkspaceId,
    pub parent_id: Option<NodeId>,
    pub kind: NodeKind,
    pub title: String,
    pub tags: BTreeSet<String>,
}

impl NewNode {
    pub fn new(
        id: impl Into<NodeId>,
        workspace_id: impl Into<WorkspaceId>,
        kind: NodeKind,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            parent_id: None,
            kind,
            title: title.into(),
            tags: BTreeSet::new(),
        }
    }

    pub fn under(mut self, parent_id: impl Into<NodeId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<String> for WorkspaceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Serialisation format of a content record.
/// 內容紀錄的序列化格式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// JSON rich-text tree (`{"root": {"children": [...]}}`).
    RichText,
    /// Diagram source text.
    Diagram,
    /// Drawing scene JSON (`{"elements": [...]}`).
    Drawing,
    PlainText,
}

/// Serialised document state, keyed 1:1 by node id.
/// 以節點識別碼一對一對應的文件內容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub node_id: NodeId,
    pub kind: ContentKind,
    pub body: String,
    /// Incremented on every accepted write; used to reject stale writes.
    #[serde(default)]
    pub version: u64,
}

impl Content {
    /// Body stored for freshly created documents.
    pub const EMPTY_BODY: &'static str = "{}";

    pub fn empty(node_id: NodeId, kind: ContentKind) -> Self {
        Self {
            node_id,
            kind,
            body: Self::EMPTY_BODY.to_string(),
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folders_have_no_content_kind() {
        assert!(!NodeKind::Folder.needs_content());
        assert_eq!(NodeKind::Folder.default_content_kind(), None);
        assert_eq!(
            NodeKind::Canvas.default_content_kind(),
            Some(ContentKind::Drawing)
        );
        assert_eq!(
            NodeKind::Diary.default_content_kind(),
            Some(ContentKind::RichText)
        );
    }

    #[test]
    fn node_deserialises_with_defaults() {
        let json = r#"{"id":"n1","workspace_id":"ws","kind":"file","title":"Ch1"}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.parent_id, None);
        assert_eq!(node.order, 0);
        assert!(node.tags.is_empty());
        assert_eq!(node.sibling_key(), SiblingKey::new("ws".into(), None));
    }
}
