use std::fs;
use std::io;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::{Content, Node};
use crate::store::NodeStore;
use crate::util::write_atomic;

const SNAPSHOT_FORMAT: u32 = 1;

/// Serialisable image of every node and content record.
/// 所有節點與內容紀錄的可序列化快照。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_format")]
    pub format: u32,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub contents: Vec<Content>,
}

fn default_format() -> u32 {
    SNAPSHOT_FORMAT
}

impl Snapshot {
    /// Captures the store with a stable ordering so repeated saves diff cleanly.
    /// 以穩定順序擷取儲存區內容，讓重複儲存的差異保持乾淨。
    pub fn capture(store: &NodeStore) -> Self {
        Self::from_records(
            store.nodes().cloned().collect(),
            store.contents().cloned().collect(),
        )
    }

    pub fn from_records(mut nodes: Vec<Node>, mut contents: Vec<Content>) -> Self {
        nodes.sort_by(|a, b| {
            a.workspace_id
                .cmp(&b.workspace_id)
                .then_with(|| a.parent_id.cmp(&b.parent_id))
                .then_with(|| a.order.cmp(&b.order))
                .then_with(|| a.id.cmp(&b.id))
        });
        contents.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Self {
            format: SNAPSHOT_FORMAT,
            nodes,
            contents,
        }
    }

    pub fn into_store(self) -> NodeStore {
        NodeStore::from_parts(self.nodes, self.contents)
    }
}

/// Persists [`Snapshot`]s to disk using JSON + atomic writes.
/// 以 JSON 搭配原子寫入方式儲存工作區快照。
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads a snapshot from disk, returning `Ok(None)` when the file is absent.
    /// 從磁碟載入快照；若檔案不存在則回傳 `Ok(None)`。
    pub fn load(&self) -> Result<Option<Snapshot>, SnapshotStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let snapshot: Snapshot = serde_json::from_str(&contents)
                    .map_err(|err| SnapshotStoreError::Invalid(err.to_string()))?;
                if snapshot.format > SNAPSHOT_FORMAT {
                    return Err(SnapshotStoreError::Invalid(format!(
                        "unsupported snapshot format {}",
                        snapshot.format
                    )));
                }
                Ok(Some(snapshot))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SnapshotStoreError::Io(err)),
        }
    }

    /// Loads the snapshot or falls back to an empty one.
    pub fn load_or_default(&self) -> Result<Snapshot, SnapshotStoreError> {
        Ok(self.load()?.unwrap_or_default())
    }

    /// Saves the provided snapshot atomically to disk.
    /// 將傳入的快照以原子方式寫入磁碟。
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotStoreError> {
        let payload = serde_json::to_vec_pretty(snapshot)
            .map_err(|err| SnapshotStoreError::Invalid(err.to_string()))?;
        write_atomic(&self.path, &payload).map_err(SnapshotStoreError::Io)
    }
}

/// Errors emitted by [`SnapshotStore`].
/// [`SnapshotStore`] 可能拋出的錯誤。
#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid snapshot payload: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NewNode, NodeId, NodeKind, WorkspaceId};
    use tempfile::tempdir;

    #[test]
    fn save_and_load_restores_the_tree() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("workspace.json"));

        let mut nodes = NodeStore::new();
        nodes
            .create_node(NewNode::new("drafts", "ws", NodeKind::Folder, "Drafts"))
            .unwrap();
        nodes
            .create_node(NewNode::new("ch1", "ws", NodeKind::File, "Ch1").under("drafts"))
            .unwrap();
        nodes
            .replace_content_body(&NodeId::from("ch1"), "body".into(), 2)
            .unwrap();

        store.save(&Snapshot::capture(&nodes)).unwrap();
        let loaded = store.load().unwrap().unwrap().into_store();
        assert_eq!(loaded.len(), 2);
        let children = loaded.children(&WorkspaceId::from("ws"), Some(&NodeId::from("drafts")));
        assert_eq!(children.len(), 1);
        let content = loaded.content(&NodeId::from("ch1")).unwrap();
        assert_eq!(content.body, "body");
        assert_eq!(content.version, 2);
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
        assert!(store.load_or_default().unwrap().nodes.is_empty());
    }

    #[test]
    fn garbage_is_reported_as_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        let err = SnapshotStore::new(&path).load().unwrap_err();
        assert!(matches!(err, SnapshotStoreError::Invalid(_)));
    }
}
