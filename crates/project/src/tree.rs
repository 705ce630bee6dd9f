//! Pure tree operations over flat node lists.
//! 針對扁平節點清單的純函式樹狀操作。

use std::collections::{HashMap, HashSet};

use crate::node::{Node, NodeId, NodeKind, SiblingKey};

/// Rooted forest built from a flat node list.
/// 由扁平節點清單建構的樹林。
#[derive(Debug, Clone, Default)]
pub struct Forest {
    nodes: HashMap<NodeId, Node>,
    roots: Vec<NodeId>,
    children: HashMap<NodeId, Vec<NodeId>>,
}

/// One row of a flattened tree.
/// 展平後的單一列。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatNode<'a> {
    pub node: &'a Node,
    pub depth: usize,
}

/// Groups nodes by parent in one pass and sorts each group by `order`.
/// 以單次走訪依父節點分組，並依 `order` 排序。
///
/// Nodes whose parent is missing from `nodes` are surfaced as roots so that
/// nothing silently disappears from the tree.
pub fn build_tree(nodes: &[Node]) -> Forest {
    let index: HashMap<NodeId, Node> = nodes
        .iter()
        .map(|node| (node.id.clone(), node.clone()))
        .collect();

    let mut roots = Vec::new();
    let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for node in nodes {
        match &node.parent_id {
            Some(parent) if index.contains_key(parent) => {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(node.id.clone());
            }
            _ => roots.push(node.id.clone()),
        }
    }

    let sort_key = |id: &NodeId| {
        let node = &index[id];
        (node.order, node.id.clone())
    };
    roots.sort_by_key(sort_key);
    for group in children.values_mut() {
        group.sort_by_key(sort_key);
    }

    Forest {
        nodes: index,
        roots,
        children,
    }
}

impl Forest {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.roots.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn children(&self, id: &NodeId) -> impl Iterator<Item = &Node> {
        self.children
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|child| self.nodes.get(child))
    }

    /// Lazily walks the forest in depth-first pre-order, only descending into
    /// folders listed in `expanded`.
    /// 以深度優先前序延遲走訪，只展開 `expanded` 內的資料夾。
    pub fn flatten<'a>(&'a self, expanded: &'a HashSet<NodeId>) -> FlattenIter<'a> {
        let stack = self.roots.iter().rev().map(|id| (id, 0)).collect();
        FlattenIter {
            forest: self,
            expanded,
            stack,
        }
    }
}

/// Convenience wrapper matching [`Forest::flatten`].
pub fn flatten_tree<'a>(forest: &'a Forest, expanded: &'a HashSet<NodeId>) -> FlattenIter<'a> {
    forest.flatten(expanded)
}

/// Restartable pre-order iterator; clone it to replay from the same point.
/// 可重新開始的前序迭代器；複製即可從同一位置重播。
#[derive(Debug, Clone)]
pub struct FlattenIter<'a> {
    forest: &'a Forest,
    expanded: &'a HashSet<NodeId>,
    stack: Vec<(&'a NodeId, usize)>,
}

impl<'a> Iterator for FlattenIter<'a> {
    type Item = FlatNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (id, depth) = self.stack.pop()?;
            let Some(node) = self.forest.nodes.get(id) else {
                continue;
            };
            if node.is_folder() && self.expanded.contains(id) {
                if let Some(group) = self.forest.children.get(id) {
                    self.stack
                        .extend(group.iter().rev().map(|child| (child, depth + 1)));
                }
            }
            return Some(FlatNode { node, depth });
        }
    }
}

/// Returns `true` when re-parenting `moving` under `new_parent` would make a
/// node its own ancestor.
/// 若將 `moving` 移至 `new_parent` 之下會形成循環則回傳 `true`。
pub fn would_create_cycle(
    nodes: &HashMap<NodeId, Node>,
    moving: &NodeId,
    new_parent: Option<&NodeId>,
) -> bool {
    let Some(start) = new_parent else {
        return false;
    };
    if start == moving {
        return true;
    }

    let mut visited: HashSet<&NodeId> = HashSet::new();
    let mut current = Some(start);
    while let Some(id) = current {
        if id == moving {
            return true;
        }
        // Stored data already containing a loop must not hang the walk.
        if !visited.insert(id) {
            return true;
        }
        current = nodes.get(id).and_then(|node| node.parent_id.as_ref());
    }
    false
}

/// `max(order) + 1` across the sibling group, or 0 when it is empty.
/// 計算兄弟群組下一個 order 值。
pub fn next_order<'a>(nodes: impl IntoIterator<Item = &'a Node>, key: &SiblingKey) -> u32 {
    nodes
        .into_iter()
        .filter(|node| node.workspace_id == key.workspace_id && node.parent_id == key.parent_id)
        .map(|node| node.order + 1)
        .max()
        .unwrap_or(0)
}

/// Rewrites a whole sibling group as a dense `0..n-1` sequence.
/// 將整個兄弟群組改寫為連續的 `0..n-1`。
pub fn resequence(ids: &[NodeId]) -> Vec<(NodeId, u32)> {
    ids.iter()
        .enumerate()
        .map(|(index, id)| (id.clone(), index as u32))
        .collect()
}

/// Desired sequence after placing `id` at `rank` (clamped to the group size).
/// 在指定名次插入 `id` 後的目標順序。
pub fn insert_at(siblings: &[NodeId], id: &NodeId, rank: usize) -> Vec<NodeId> {
    let mut sequence: Vec<NodeId> = siblings
        .iter()
        .filter(|existing| *existing != id)
        .cloned()
        .collect();
    let rank = rank.min(sequence.len());
    sequence.insert(rank, id.clone());
    sequence
}

/// Path from the root down to `id` (breadcrumbs). Empty when `id` is unknown.
/// 從根節點到 `id` 的路徑（麵包屑）。
pub fn node_path<'a>(nodes: &'a HashMap<NodeId, Node>, id: &NodeId) -> Vec<&'a Node> {
    let mut path = Vec::new();
    let mut visited = HashSet::new();
    let mut current = nodes.get(id);
    while let Some(node) = current {
        if !visited.insert(&node.id) {
            break;
        }
        path.push(node);
        current = node
            .parent_id
            .as_ref()
            .and_then(|parent| nodes.get(parent));
    }
    path.reverse();
    path
}

pub fn filter_by_kind(nodes: &[Node], kind: NodeKind) -> Vec<&Node> {
    nodes.iter().filter(|node| node.kind == kind).collect()
}

pub fn filter_by_tag<'a>(nodes: &'a [Node], tag: &str) -> Vec<&'a Node> {
    nodes.iter().filter(|node| node.tags.contains(tag)).collect()
}
