//! Persistence gateway contract and the backends shipped with Quire.
//! 持久化閘道介面與 Quire 內建的後端實作。

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use quire_project::tree;
use quire_project::{
    Content, Node, NodeId, SiblingKey, Snapshot, SnapshotStore, SnapshotStoreError, WorkspaceId,
};
use thiserror::Error;
use tracing::debug;

/// Failures reported by a persistence backend.
/// 持久化後端回報的錯誤。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("{0} not found in backend")]
    NotFound(NodeId),
    #[error("stale write for {node}: expected version {expected}, backend has {actual}")]
    Conflict {
        node: NodeId,
        expected: u64,
        actual: u64,
    },
    #[error("backend failure: {0}")]
    Backend(String),
}

impl From<SnapshotStoreError> for PersistenceError {
    fn from(err: SnapshotStoreError) -> Self {
        PersistenceError::Backend(err.to_string())
    }
}

/// Async contract every storage backend fulfils. Implementations must not
/// block the calling async worker.
/// 每個儲存後端都需實作的非同步介面；實作不得阻塞呼叫端的非同步工作執行緒。
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn create_node(&self, node: &Node) -> Result<(), PersistenceError>;

    /// Replaces the stored record (title, tags, collapse flag).
    async fn update_node(&self, node: &Node) -> Result<(), PersistenceError>;

    /// Re-parents `id` and inserts it at `order` among its new siblings.
    async fn move_node(
        &self,
        id: &NodeId,
        parent: Option<&NodeId>,
        order: u32,
    ) -> Result<(), PersistenceError>;

    /// Removes `id` together with its descendants and their contents.
    async fn delete_node(&self, id: &NodeId) -> Result<(), PersistenceError>;

    /// Assigns `order = index` along `ids`.
    async fn reorder_nodes(&self, ids: &[NodeId]) -> Result<(), PersistenceError>;

    async fn get_nodes_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Node>, PersistenceError>;

    /// Stores `body` when the backend still holds `expected_version`, and
    /// returns the new version.
    async fn save_content(
        &self,
        node_id: &NodeId,
        body: &str,
        expected_version: u64,
    ) -> Result<u64, PersistenceError>;

    async fn get_content_by_node_id(
        &self,
        node_id: &NodeId,
    ) -> Result<Option<Content>, PersistenceError>;
}

/// Record kept by the in-memory backends.
#[derive(Debug, Clone, Default)]
struct BackendState {
    nodes: HashMap<NodeId, Node>,
    contents: HashMap<NodeId, Content>,
}

impl BackendState {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            nodes: snapshot
                .nodes
                .into_iter()
                .map(|node| (node.id.clone(), node))
                .collect(),
            contents: snapshot
                .contents
                .into_iter()
                .map(|content| (content.node_id.clone(), content))
                .collect(),
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::from_records(
            self.nodes.values().cloned().collect(),
            self.contents.values().cloned().collect(),
        )
    }

    fn group(&self, key: &SiblingKey) -> Vec<NodeId> {
        let mut members: Vec<&Node> = self
            .nodes
            .values()
            .filter(|node| &node.sibling_key() == key)
            .collect();
        members.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        members.into_iter().map(|node| node.id.clone()).collect()
    }

    fn apply(&mut self, sequence: &[NodeId]) {
        for (id, order) in tree::resequence(sequence) {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.order = order;
            }
        }
    }

    fn create(&mut self, node: &Node) -> Result<(), PersistenceError> {
        if self.nodes.contains_key(&node.id) {
            return Err(PersistenceError::Backend(format!(
                "node {} already exists",
                node.id
            )));
        }
        if let Some(kind) = node.kind.default_content_kind() {
            self.contents
                .insert(node.id.clone(), Content::empty(node.id.clone(), kind));
        }
        self.nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    fn update(&mut self, node: &Node) -> Result<(), PersistenceError> {
        let stored = self
            .nodes
            .get_mut(&node.id)
            .ok_or_else(|| PersistenceError::NotFound(node.id.clone()))?;
        stored.title = node.title.clone();
        stored.tags = node.tags.clone();
        stored.collapsed = node.collapsed;
        stored.updated_at_ms = node.updated_at_ms;
        Ok(())
    }

    fn relocate(
        &mut self,
        id: &NodeId,
        parent: Option<&NodeId>,
        order: u32,
    ) -> Result<(), PersistenceError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| PersistenceError::NotFound(id.clone()))?;
        if let Some(parent_id) = parent {
            if !self.nodes.contains_key(parent_id) {
                return Err(PersistenceError::NotFound(parent_id.clone()));
            }
        }
        let old_key = node.sibling_key();
        let new_key = SiblingKey::new(node.workspace_id.clone(), parent.cloned());

        let remaining: Vec<NodeId> = self
            .group(&old_key)
            .into_iter()
            .filter(|other| other != id)
            .collect();
        self.apply(&remaining);

        let siblings: Vec<NodeId> = self
            .group(&new_key)
            .into_iter()
            .filter(|other| other != id)
            .collect();
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent_id = parent.cloned();
        }
        let sequence = tree::insert_at(&siblings, id, order as usize);
        self.apply(&sequence);
        Ok(())
    }

    fn remove(&mut self, id: &NodeId) -> Result<(), PersistenceError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| PersistenceError::NotFound(id.clone()))?;
        let parent_key = node.sibling_key();
        let mut doomed = vec![id.clone()];
        let mut seen: HashSet<NodeId> = HashSet::from([id.clone()]);
        let mut cursor = 0;
        while cursor < doomed.len() {
            let current = doomed[cursor].clone();
            for node in self.nodes.values() {
                if node.parent_id.as_ref() == Some(&current) && seen.insert(node.id.clone()) {
                    doomed.push(node.id.clone());
                }
            }
            cursor += 1;
        }
        for victim in &doomed {
            self.nodes.remove(victim);
            self.contents.remove(victim);
        }
        let remaining = self.group(&parent_key);
        self.apply(&remaining);
        Ok(())
    }

    fn reorder(&mut self, ids: &[NodeId]) -> Result<(), PersistenceError> {
        if let Some(missing) = ids.iter().find(|id| !self.nodes.contains_key(*id)) {
            return Err(PersistenceError::NotFound(missing.clone()));
        }
        self.apply(ids);
        Ok(())
    }

    fn list(&self, workspace_id: &WorkspaceId) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .values()
            .filter(|node| &node.workspace_id == workspace_id)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    fn save(
        &mut self,
        node_id: &NodeId,
        body: &str,
        expected_version: u64,
    ) -> Result<u64, PersistenceError> {
        let content = self
            .contents
            .get_mut(node_id)
            .ok_or_else(|| PersistenceError::NotFound(node_id.clone()))?;
        if content.version != expected_version {
            return Err(PersistenceError::Conflict {
                node: node_id.clone(),
                expected: expected_version,
                actual: content.version,
            });
        }
        content.body = body.to_string();
        content.version += 1;
        Ok(content.version)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A content write observed by [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRecord {
    pub node_id: NodeId,
    pub body: String,
    pub expected_version: u64,
}

#[derive(Debug, Default)]
struct MemoryHooks {
    saves: Vec<SaveRecord>,
    failures_left: usize,
    failure_message: String,
}

/// In-process backend with call recording and failure injection.
/// 具呼叫紀錄與錯誤注入功能的行程內後端。
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<BackendState>,
    hooks: Mutex<MemoryHooks>,
    save_latency: Option<Duration>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the backend with existing records.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            state: Mutex::new(BackendState::from_snapshot(snapshot)),
            ..Self::default()
        }
    }

    /// Makes every `save_content` sleep before answering.
    pub fn with_save_latency(mut self, latency: Duration) -> Self {
        self.save_latency = Some(latency);
        self
    }

    /// Fails the next `count` content saves with `message`.
    pub fn fail_next_saves(&self, count: usize, message: impl Into<String>) {
        let mut hooks = lock(&self.hooks);
        hooks.failures_left = count;
        hooks.failure_message = message.into();
    }

    /// Every `save_content` call received so far, failed ones included.
    pub fn saves(&self) -> Vec<SaveRecord> {
        lock(&self.hooks).saves.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        lock(&self.state).snapshot()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn create_node(&self, node: &Node) -> Result<(), PersistenceError> {
        lock(&self.state).create(node)
    }

    async fn update_node(&self, node: &Node) -> Result<(), PersistenceError> {
        lock(&self.state).update(node)
    }

    async fn move_node(
        &self,
        id: &NodeId,
        parent: Option<&NodeId>,
        order: u32,
    ) -> Result<(), PersistenceError> {
        lock(&self.state).relocate(id, parent, order)
    }

    async fn delete_node(&self, id: &NodeId) -> Result<(), PersistenceError> {
        lock(&self.state).remove(id)
    }

    async fn reorder_nodes(&self, ids: &[NodeId]) -> Result<(), PersistenceError> {
        lock(&self.state).reorder(ids)
    }

    async fn get_nodes_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Node>, PersistenceError> {
        Ok(lock(&self.state).list(workspace_id))
    }

    async fn save_content(
        &self,
        node_id: &NodeId,
        body: &str,
        expected_version: u64,
    ) -> Result<u64, PersistenceError> {
        let injected = {
            let mut hooks = lock(&self.hooks);
            hooks.saves.push(SaveRecord {
                node_id: node_id.clone(),
                body: body.to_string(),
                expected_version,
            });
            if hooks.failures_left > 0 {
                hooks.failures_left -= 1;
                Some(hooks.failure_message.clone())
            } else {
                None
            }
        };
        if let Some(latency) = self.save_latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = injected {
            return Err(PersistenceError::Backend(message));
        }
        lock(&self.state).save(node_id, body, expected_version)
    }

    async fn get_content_by_node_id(
        &self,
        node_id: &NodeId,
    ) -> Result<Option<Content>, PersistenceError> {
        Ok(lock(&self.state).contents.get(node_id).cloned())
    }
}

/// Backend persisting a JSON snapshot after every accepted write.
/// Disk writes run on the blocking pool, never on an async worker.
/// 每次成功寫入後即儲存 JSON 快照的後端；磁碟寫入於阻塞執行緒池進行。
#[derive(Debug, Clone)]
pub struct FileGateway {
    inner: Arc<FileBackend>,
}

#[derive(Debug)]
struct FileBackend {
    store: SnapshotStore,
    state: Mutex<BackendState>,
}

impl FileBackend {
    fn commit<T>(
        &self,
        op: impl FnOnce(&mut BackendState) -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let mut state = lock(&self.state);
        let mut draft = state.clone();
        let value = op(&mut draft)?;
        self.store.save(&draft.snapshot())?;
        *state = draft;
        Ok(value)
    }
}

impl FileGateway {
    /// Opens the snapshot at `path`, starting empty when the file is absent.
    /// 開啟指定路徑的快照；若檔案不存在則以空白狀態開始。
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let store = SnapshotStore::new(path);
        let snapshot = store.load_or_default()?;
        debug!(path = %store.path().display(), nodes = snapshot.nodes.len(), "opened snapshot");
        Ok(Self {
            inner: Arc::new(FileBackend {
                store,
                state: Mutex::new(BackendState::from_snapshot(snapshot)),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        self.inner.store.path()
    }

    /// Writes the current state even when nothing changed. Blocks the caller.
    pub fn persist(&self) -> Result<(), PersistenceError> {
        let snapshot = lock(&self.inner.state).snapshot();
        self.inner.store.save(&snapshot)?;
        Ok(())
    }

    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut BackendState) -> Result<T, PersistenceError> + Send + 'static,
    ) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
    {
        let backend = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || backend.commit(op))
            .await
            .map_err(|err| PersistenceError::Backend(format!("write task failed: {err}")))?
    }
}

#[async_trait]
impl PersistenceGateway for FileGateway {
    async fn create_node(&self, node: &Node) -> Result<(), PersistenceError> {
        let node = node.clone();
        self.mutate(move |state| state.create(&node)).await
    }

    async fn update_node(&self, node: &Node) -> Result<(), PersistenceError> {
        let node = node.clone();
        self.mutate(move |state| state.update(&node)).await
    }

    async fn move_node(
        &self,
        id: &NodeId,
        parent: Option<&NodeId>,
        order: u32,
    ) -> Result<(), PersistenceError> {
        let id = id.clone();
        let parent = parent.cloned();
        self.mutate(move |state| state.relocate(&id, parent.as_ref(), order))
            .await
    }

    async fn delete_node(&self, id: &NodeId) -> Result<(), PersistenceError> {
        let id = id.clone();
        self.mutate(move |state| state.remove(&id)).await
    }

    async fn reorder_nodes(&self, ids: &[NodeId]) -> Result<(), PersistenceError> {
        let ids = ids.to_vec();
        self.mutate(move |state| state.reorder(&ids)).await
    }

    async fn get_nodes_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Node>, PersistenceError> {
        Ok(lock(&self.inner.state).list(workspace_id))
    }

    async fn save_content(
        &self,
        node_id: &NodeId,
        body: &str,
        expected_version: u64,
    ) -> Result<u64, PersistenceError> {
        let node_id = node_id.clone();
        let body = body.to_string();
        self.mutate(move |state| state.save(&node_id, &body, expected_version))
            .await
    }

    async fn get_content_by_node_id(
        &self,
        node_id: &NodeId,
    ) -> Result<Option<Content>, PersistenceError> {
        Ok(lock(&self.inner.state).contents.get(node_id).cloned())
    }
}
