use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::node::{Content, NewNode, Node, NodeId, SiblingKey, WorkspaceId};
use crate::tree::{self, Forest};
use crate::util::current_timestamp_ms;

/// Structural errors raised before any mutation is applied.
/// 在任何變更套用前即回報的結構性錯誤。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("moving {node} under {parent} would create a cycle")]
    Cycle { node: NodeId, parent: NodeId },
    #[error("node {0} not found")]
    NotFound(NodeId),
}

/// Result of a validated move, carrying everything the backend needs.
/// 移動成功後的結果，包含後端同步所需的資訊。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub node: Node,
    pub previous_parent: Option<NodeId>,
    /// Final `order` of every node in the touched sibling groups.
    pub orders: Vec<(NodeId, u32)>,
}

/// Authoritative in-memory node set: an arena keyed by id plus an ordered
/// child index per sibling group.
/// 權威的記憶體節點集合：以識別碼為鍵的節點池，加上每個兄弟群組的有序子節點索引。
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: HashMap<NodeId, Node>,
    groups: HashMap<SiblingKey, Vec<NodeId>>,
    contents: HashMap<NodeId, Content>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from previously persisted nodes and contents.
    /// 從既有的節點與內容建立儲存區。
    pub fn from_parts(nodes: Vec<Node>, contents: Vec<Content>) -> Self {
        let mut store = Self::new();
        store.insert_loaded(nodes, contents);
        store
    }

    /// Replaces every node of `workspace_id` with the given listing.
    /// 以傳入的清單取代指定工作區的所有節點。
    pub fn load(
        &mut self,
        workspace_id: &WorkspaceId,
        nodes: Vec<Node>,
        contents: Vec<Content>,
    ) {
        let stale: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| &node.workspace_id == workspace_id)
            .map(|node| node.id.clone())
            .collect();
        for id in &stale {
            self.nodes.remove(id);
            self.contents.remove(id);
        }
        self.groups.retain(|key, _| &key.workspace_id != workspace_id);
        self.insert_loaded(nodes, contents);
    }

    fn insert_loaded(&mut self, nodes: Vec<Node>, contents: Vec<Content>) {
        for node in nodes {
            self.groups
                .entry(node.sibling_key())
                .or_default()
                .push(node.id.clone());
            self.nodes.insert(node.id.clone(), node);
        }
        for group in self.groups.values_mut() {
            group.sort_by(|a, b| {
                let left = &self.nodes[a];
                let right = &self.nodes[b];
                left.order.cmp(&right.order).then_with(|| a.cmp(b))
            });
        }
        for content in contents {
            if self.nodes.contains_key(&content.node_id) {
                self.contents.insert(content.node_id.clone(), content);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn content(&self, id: &NodeId) -> Option<&Content> {
        self.contents.get(id)
    }

    /// Arena view used by the pure tree operations.
    pub fn node_map(&self) -> &HashMap<NodeId, Node> {
        &self.nodes
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn contents(&self) -> impl Iterator<Item = &Content> {
        self.contents.values()
    }

    pub fn nodes_in_workspace(&self, workspace_id: &WorkspaceId) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|node| &node.workspace_id == workspace_id)
            .collect()
    }

    /// Children of `parent` in sibling order.
    /// 依順序取得父節點下的子節點。
    pub fn children(&self, workspace_id: &WorkspaceId, parent: Option<&NodeId>) -> Vec<&Node> {
        let key = SiblingKey::new(workspace_id.clone(), parent.cloned());
        self.groups
            .get(&key)
            .map(|group| group.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Builds a forest for a single workspace.
    pub fn forest(&self, workspace_id: &WorkspaceId) -> Forest {
        let nodes: Vec<Node> = self
            .nodes_in_workspace(workspace_id)
            .into_iter()
            .cloned()
            .collect();
        tree::build_tree(&nodes)
    }

    /// Root-to-node breadcrumb path.
    pub fn path(&self, id: &NodeId) -> Vec<&Node> {
        tree::node_path(&self.nodes, id)
    }

    /// `max(order) + 1` among the current siblings, or 0.
    /// 目前兄弟節點中最大 order 加一；若無兄弟則為 0。
    pub fn next_order(&self, workspace_id: &WorkspaceId, parent: Option<&NodeId>) -> u32 {
        let key = SiblingKey::new(workspace_id.clone(), parent.cloned());
        let siblings = self
            .groups
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.nodes.get(id));
        tree::next_order(siblings, &key)
    }

    /// Creates a node at the end of its sibling group. Non-folders receive an
    /// empty content record.
    /// 在兄弟群組尾端建立節點；非資料夾節點會同時建立空白內容。
    pub fn create_node(&mut self, draft: NewNode) -> Result<Node, StoreError> {
        let title = validate_title(&draft.title)?;
        if self.nodes.contains_key(&draft.id) {
            return Err(StoreError::Validation(format!(
                "node {} already exists",
                draft.id
            )));
        }
        if let Some(parent_id) = &draft.parent_id {
            self.require_folder_parent(parent_id, &draft.workspace_id)?;
        }
        let tags = validate_tags(draft.tags.iter())?;

        let now = current_timestamp_ms();
        let order = self.next_order(&draft.workspace_id, draft.parent_id.as_ref());
        let node = Node {
            id: draft.id.clone(),
            workspace_id: draft.workspace_id,
            parent_id: draft.parent_id,
            kind: draft.kind,
            title,
            order,
            collapsed: false,
            tags,
            created_at_ms: now,
            updated_at_ms: now,
        };

        let key = node.sibling_key();
        let mut sequence = self.groups.get(&key).cloned().unwrap_or_default();
        sequence.push(node.id.clone());
        if let Some(kind) = node.kind.default_content_kind() {
            self.contents
                .insert(node.id.clone(), Content::empty(node.id.clone(), kind));
        }
        self.nodes.insert(node.id.clone(), node);
        self.apply_sequence(key, sequence);

        debug!(node = %draft.id, "created node");
        Ok(self.nodes[&draft.id].clone())
    }

    /// Re-parents a node. Without `order` the node is appended to the new
    /// group; otherwise it is inserted at that rank. Both touched groups are
    /// rewritten densely.
    /// 移動節點；未指定 `order` 時附加於新群組尾端，否則插入指定名次。兩個受影響群組皆重新編號。
    pub fn move_node(
        &mut self,
        id: &NodeId,
        new_parent: Option<&NodeId>,
        order: Option<u32>,
    ) -> Result<MoveOutcome, StoreError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let workspace_id = node.workspace_id.clone();
        let old_key = node.sibling_key();
        let previous_parent = node.parent_id.clone();

        if let Some(parent_id) = new_parent {
            if !self.nodes.contains_key(parent_id) {
                return Err(StoreError::NotFound(parent_id.clone()));
            }
            if tree::would_create_cycle(&self.nodes, id, Some(parent_id)) {
                return Err(StoreError::Cycle {
                    node: id.clone(),
                    parent: parent_id.clone(),
                });
            }
            self.require_folder_parent(parent_id, &workspace_id)?;
        }

        let new_key = SiblingKey::new(workspace_id, new_parent.cloned());
        let mut orders = Vec::new();

        if old_key != new_key {
            let remaining: Vec<NodeId> = self
                .groups
                .get(&old_key)
                .map(|group| group.iter().filter(|other| *other != id).cloned().collect())
                .unwrap_or_default();
            orders.extend(self.apply_sequence(old_key, remaining));
        }

        let siblings = self.groups.get(&new_key).cloned().unwrap_or_default();
        let sequence = match order {
            Some(rank) => tree::insert_at(&siblings, id, rank as usize),
            None => tree::insert_at(&siblings, id, usize::MAX),
        };

        if let Some(node) = self.nodes.get_mut(id) {
            node.parent_id = new_parent.cloned();
            node.updated_at_ms = current_timestamp_ms();
        }
        orders.extend(self.apply_sequence(new_key, sequence));

        debug!(node = %id, parent = ?new_parent, "moved node");
        Ok(MoveOutcome {
            node: self.nodes[id].clone(),
            previous_parent,
            orders,
        })
    }

    /// Renames a node; empty or whitespace-only titles are rejected.
    /// 重新命名節點；空白標題會被拒絕。
    pub fn rename_node(&mut self, id: &NodeId, title: &str) -> Result<Node, StoreError> {
        if !self.nodes.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        let title = validate_title(title)?;
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        node.title = title;
        node.updated_at_ms = current_timestamp_ms();
        Ok(node.clone())
    }

    /// Removes a node, its whole subtree, and their content records.
    /// Returns the removed ids, subtree root first.
    /// 刪除節點及其整個子樹與內容紀錄，回傳被刪除的識別碼（子樹根節點在前）。
    pub fn delete_node(&mut self, id: &NodeId) -> Result<Vec<NodeId>, StoreError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let parent_key = node.sibling_key();

        // Loaded data may hold a parent loop; each node is visited once.
        let mut removed = vec![id.clone()];
        let mut seen: HashSet<NodeId> = HashSet::from([id.clone()]);
        let mut cursor = 0;
        while cursor < removed.len() {
            let current = &self.nodes[&removed[cursor]];
            let key = SiblingKey::new(current.workspace_id.clone(), Some(current.id.clone()));
            if let Some(group) = self.groups.get(&key) {
                for child in group {
                    if seen.insert(child.clone()) {
                        removed.push(child.clone());
                    }
                }
            }
            cursor += 1;
        }

        for victim in &removed {
            self.contents.remove(victim);
            if let Some(node) = self.nodes.remove(victim) {
                self.groups
                    .remove(&SiblingKey::new(node.workspace_id, Some(node.id)));
            }
        }

        let remaining: Vec<NodeId> = self
            .groups
            .get(&parent_key)
            .map(|group| group.iter().filter(|other| *other != id).cloned().collect())
            .unwrap_or_default();
        self.apply_sequence(parent_key, remaining);

        debug!(node = %id, count = removed.len(), "deleted subtree");
        Ok(removed)
    }

    /// Assigns `order = index` following `ordered_ids`. Siblings missing from
    /// the batch keep their relative order after the listed ones.
    /// 依 `ordered_ids` 指定 `order = index`；未列出的兄弟節點依原順序排在後面。
    pub fn reorder_nodes(&mut self, ordered_ids: &[NodeId]) -> Result<Vec<(NodeId, u32)>, StoreError> {
        let Some(first) = ordered_ids.first() else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        for id in ordered_ids {
            if !seen.insert(id) {
                return Err(StoreError::Validation(format!(
                    "duplicate id {id} in reorder batch"
                )));
            }
        }

        let key = self
            .nodes
            .get(first)
            .map(Node::sibling_key)
            .ok_or_else(|| StoreError::NotFound(first.clone()))?;
        for id in ordered_ids {
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if node.sibling_key() != key {
                return Err(StoreError::Validation(
                    "reorder batch spans several sibling groups".into(),
                ));
            }
        }

        let mut sequence: Vec<NodeId> = ordered_ids.to_vec();
        if let Some(group) = self.groups.get(&key) {
            sequence.extend(group.iter().filter(|id| !seen.contains(id)).cloned());
        }
        Ok(self.apply_sequence(key, sequence))
    }

    pub fn set_collapsed(&mut self, id: &NodeId, collapsed: bool) -> Result<(), StoreError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if !node.is_folder() {
            return Err(StoreError::Validation(format!(
                "only folders can be collapsed ({id} is a {})",
                node.kind
            )));
        }
        node.collapsed = collapsed;
        Ok(())
    }

    pub fn add_tag(&mut self, id: &NodeId, tag: &str) -> Result<Node, StoreError> {
        let tag = validate_tags(std::iter::once(&tag.to_string()))?;
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        node.tags.extend(tag);
        node.updated_at_ms = current_timestamp_ms();
        Ok(node.clone())
    }

    pub fn remove_tag(&mut self, id: &NodeId, tag: &str) -> Result<Node, StoreError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if node.tags.remove(tag.trim()) {
            node.updated_at_ms = current_timestamp_ms();
        }
        Ok(node.clone())
    }

    /// Copies a node (not its children) and its content under the same parent.
    /// 複製節點（不含子節點）與其內容至相同父節點下。
    pub fn duplicate_node(&mut self, id: &NodeId, new_id: NodeId) -> Result<Node, StoreError> {
        let source = self
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let mut draft = NewNode::new(
            new_id.clone(),
            source.workspace_id.clone(),
            source.kind,
            format!("{} (copy)", source.title),
        );
        draft.parent_id = source.parent_id.clone();
        draft.tags = source.tags.clone();
        let created = self.create_node(draft)?;

        if let Some(original) = self.contents.get(id).cloned() {
            self.contents.insert(
                new_id.clone(),
                Content {
                    node_id: new_id,
                    kind: original.kind,
                    body: original.body,
                    version: 0,
                },
            );
        }
        Ok(created)
    }

    /// Records a body accepted by the backend in the client-side cache.
    /// 將後端接受的內容寫入用戶端快取。
    pub fn replace_content_body(&mut self, id: &NodeId, body: String, version: u64) -> Result<(), StoreError> {
        let content = self
            .contents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        content.body = body;
        content.version = version;
        if let Some(node) = self.nodes.get_mut(id) {
            node.updated_at_ms = current_timestamp_ms();
        }
        Ok(())
    }

    fn require_folder_parent(
        &self,
        parent_id: &NodeId,
        workspace_id: &WorkspaceId,
    ) -> Result<(), StoreError> {
        let parent = self
            .nodes
            .get(parent_id)
            .ok_or_else(|| StoreError::NotFound(parent_id.clone()))?;
        if !parent.is_folder() {
            return Err(StoreError::Validation(format!(
                "{parent_id} is a {} and cannot hold children",
                parent.kind
            )));
        }
        if &parent.workspace_id != workspace_id {
            return Err(StoreError::Validation(format!(
                "{parent_id} belongs to another workspace"
            )));
        }
        Ok(())
    }

    /// Rewrites a whole group as `0..n-1` following `sequence`.
    fn apply_sequence(&mut self, key: SiblingKey, sequence: Vec<NodeId>) -> Vec<(NodeId, u32)> {
        let orders = tree::resequence(&sequence);
        for (id, order) in &orders {
            if let Some(node) = self.nodes.get_mut(id) {
                node.order = *order;
            }
        }
        if sequence.is_empty() {
            self.groups.remove(&key);
        } else {
            self.groups.insert(key, sequence);
        }
        orders
    }
}

fn validate_title(title: &str) -> Result<String, StoreError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Validation("title must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

fn validate_tags<'a>(
    tags: impl Iterator<Item = &'a String>,
) -> Result<std::collections::BTreeSet<String>, StoreError> {
    let mut cleaned = std::collections::BTreeSet::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            return Err(StoreError::Validation("tags must not be empty".into()));
        }
        cleaned.insert(trimmed.to_string());
    }
    Ok(cleaned)
}
