//! Workspace session: the explicit context tying the node store, tabs,
//! autosave and search to a persistence gateway.
//! 工作階段：將節點儲存區、分頁、自動儲存與搜尋連結至持久化閘道的明確情境物件。

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use quire_project::{
    diary_body, DiaryPath, MoveOutcome, NewNode, Node, NodeId, NodeKind, NodeStore, StoreError,
    WorkspaceId, DIARY_TAG,
};
use quire_search::{simple_search, FieldWeights, SearchHit, SearchIndex, SearchOptions, SimpleHit};
use quire_settings::Preferences;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::autosave::AutosaveScheduler;
use crate::export::{export_workspace, ExportError, ExportFormat};
use crate::gateway::{PersistenceError, PersistenceGateway};
use crate::tabs::{EditorInstanceState, EditorTab, TabError, TabId, TabManager, TabStatus};

/// 工作階段設定。 / Runtime knobs of a session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// Zero disables timed autosave.
    pub autosave_delay: Duration,
    pub cache_limit: usize,
    pub weights: FieldWeights,
    pub result_limit: usize,
    pub fuzzy: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Preferences::default())
    }
}

impl From<&Preferences> for SessionConfig {
    fn from(preferences: &Preferences) -> Self {
        Self {
            autosave_delay: Duration::from_millis(preferences.autosave.effective_delay_ms()),
            cache_limit: preferences.editor.cache_limit,
            weights: FieldWeights {
                title: f64::from(preferences.search.title_weight),
                tags: f64::from(preferences.search.tags_weight),
                body: f64::from(preferences.search.body_weight),
            },
            result_limit: preferences.search.result_limit,
            fuzzy: preferences.search.fuzzy,
        }
    }
}

/// 工作階段錯誤。 / Errors surfaced synchronously to session callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Tab(#[from] TabError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("{0} has no editable content")]
    NotEditable(NodeId),
}

/// A structural change the backend rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncFailure {
    pub action: &'static str,
    pub node_id: NodeId,
    pub error: PersistenceError,
}

/// 關閉工作階段時的儲存結果。 / What happened while flushing on shutdown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub saved: usize,
    pub failed: Vec<(NodeId, PersistenceError)>,
}

#[derive(Debug)]
enum Outcome {
    Saved {
        node_id: NodeId,
        body: String,
        result: Result<u64, PersistenceError>,
    },
    Synced {
        action: &'static str,
        node_id: NodeId,
        result: Result<(), PersistenceError>,
    },
}

/// 工作區的編輯情境。 / Editing context over one gateway.
///
/// All in-memory state is mutated synchronously by the owning task. Gateway
/// calls run on a worker task, strictly in submission order, and report back
/// through a channel drained by [`WorkspaceSession::apply_outcomes`]. Methods
/// that issue gateway calls must run inside a tokio runtime.
pub struct WorkspaceSession {
    config: SessionConfig,
    gateway: Arc<dyn PersistenceGateway>,
    store: NodeStore,
    tabs: TabManager,
    autosave: AutosaveScheduler,
    index: Option<SearchIndex>,
    saved_bodies: HashMap<NodeId, String>,
    /// Bodies whose last save failed and that nothing newer has replaced.
    unsaved: HashMap<NodeId, String>,
    in_flight: HashSet<NodeId>,
    outstanding: usize,
    sync_failures: Vec<SyncFailure>,
    /// Collects failed saves only while `shutdown` runs.
    shutdown_failures: Option<Vec<(NodeId, PersistenceError)>>,
    saves_completed: usize,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
    outcome_rx: mpsc::UnboundedReceiver<Outcome>,
}

impl WorkspaceSession {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, config: SessionConfig) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            tabs: TabManager::new(config.cache_limit),
            autosave: AutosaveScheduler::new(config.autosave_delay),
            config,
            gateway,
            store: NodeStore::new(),
            index: None,
            saved_bodies: HashMap::new(),
            unsaved: HashMap::new(),
            in_flight: HashSet::new(),
            outstanding: 0,
            sync_failures: Vec::new(),
            shutdown_failures: None,
            saves_completed: 0,
            jobs: None,
            outcome_tx,
            outcome_rx,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn tabs(&self) -> &TabManager {
        &self.tabs
    }

    /// 從閘道載入工作區節點與內容。 / Loads a workspace listing from the gateway.
    pub async fn load_workspace(&mut self, workspace_id: &WorkspaceId) -> Result<usize, SessionError> {
        let nodes = self.gateway.get_nodes_by_workspace(workspace_id).await?;
        let mut contents = Vec::new();
        for node in nodes.iter().filter(|node| node.kind.needs_content()) {
            if let Some(content) = self.gateway.get_content_by_node_id(&node.id).await? {
                contents.push(content);
            }
        }
        for node in self.store.nodes_in_workspace(workspace_id) {
            self.saved_bodies.remove(&node.id);
        }
        for content in &contents {
            self.saved_bodies
                .insert(content.node_id.clone(), content.body.clone());
        }
        let count = nodes.len();
        self.store.load(workspace_id, nodes, contents);
        self.index = None;
        info!(workspace = %workspace_id, nodes = count, "loaded workspace");
        Ok(count)
    }

    // ---- tree mutations ------------------------------------------------

    pub fn create_node(&mut self, draft: NewNode) -> Result<Node, SessionError> {
        let node = self.store.create_node(draft)?;
        if let Some(content) = self.store.content(&node.id) {
            self.saved_bodies
                .insert(node.id.clone(), content.body.clone());
        }
        let record = node.clone();
        self.spawn_sync("create", node.id.clone(), move |gateway| async move {
            gateway.create_node(&record).await
        });
        self.index = None;
        Ok(node)
    }

    pub fn move_node(
        &mut self,
        id: &NodeId,
        new_parent: Option<&NodeId>,
        order: Option<u32>,
    ) -> Result<MoveOutcome, SessionError> {
        let outcome = self.store.move_node(id, new_parent, order)?;
        let node_id = outcome.node.id.clone();
        let parent = outcome.node.parent_id.clone();
        let rank = outcome.node.order;
        self.spawn_sync("move", node_id.clone(), move |gateway| async move {
            gateway.move_node(&node_id, parent.as_ref(), rank).await
        });
        Ok(outcome)
    }

    pub fn rename_node(&mut self, id: &NodeId, title: &str) -> Result<Node, SessionError> {
        let node = self.store.rename_node(id, title)?;
        self.tabs.rename_node_tab(id, &node.title);
        self.push_update(&node);
        self.index = None;
        Ok(node)
    }

    /// 刪除子樹並關閉其分頁（不寫入待存內容）。
    /// / Deletes a subtree and closes its tabs without flushing their edits.
    pub fn delete_node(&mut self, id: &NodeId) -> Result<Vec<NodeId>, SessionError> {
        let removed = self.store.delete_node(id)?;
        for node_id in &removed {
            self.autosave.cancel(node_id);
            self.saved_bodies.remove(node_id);
            self.unsaved.remove(node_id);
            if let Some(tab) = self.tabs.find_tab_by_node_id(node_id).map(|tab| tab.id) {
                self.tabs.close_tab(tab)?;
            }
        }
        let root = id.clone();
        self.spawn_sync("delete", id.clone(), move |gateway| async move {
            gateway.delete_node(&root).await
        });
        self.index = None;
        Ok(removed)
    }

    pub fn reorder_nodes(&mut self, ordered_ids: &[NodeId]) -> Result<Vec<(NodeId, u32)>, SessionError> {
        let orders = self.store.reorder_nodes(ordered_ids)?;
        if let Some((first, _)) = orders.first() {
            let sequence: Vec<NodeId> = orders.iter().map(|(id, _)| id.clone()).collect();
            self.spawn_sync("reorder", first.clone(), move |gateway| async move {
                gateway.reorder_nodes(&sequence).await
            });
        }
        Ok(orders)
    }

    pub fn set_collapsed(&mut self, id: &NodeId, collapsed: bool) -> Result<(), SessionError> {
        self.store.set_collapsed(id, collapsed)?;
        if let Some(node) = self.store.node(id).cloned() {
            self.push_update(&node);
        }
        Ok(())
    }

    pub fn add_tag(&mut self, id: &NodeId, tag: &str) -> Result<Node, SessionError> {
        let node = self.store.add_tag(id, tag)?;
        self.push_update(&node);
        self.index = None;
        Ok(node)
    }

    pub fn remove_tag(&mut self, id: &NodeId, tag: &str) -> Result<Node, SessionError> {
        let node = self.store.remove_tag(id, tag)?;
        self.push_update(&node);
        self.index = None;
        Ok(node)
    }

    pub fn duplicate_node(&mut self, id: &NodeId, new_id: NodeId) -> Result<Node, SessionError> {
        let node = self.store.duplicate_node(id, new_id)?;
        match self.store.content(&node.id).map(|content| content.body.clone()) {
            Some(body) => self.spawn_create_with_body(node.clone(), body),
            None => {
                let record = node.clone();
                self.spawn_sync("duplicate", node.id.clone(), move |gateway| async move {
                    gateway.create_node(&record).await
                });
            }
        }
        self.index = None;
        Ok(node)
    }

    /// 在 `Diary/年/月/日` 下建立日記；缺少的資料夾會建立並收合。
    /// / Creates a diary entry under `Diary/year/month/day`, creating missing
    /// folders collapsed. Existing folders are matched by title.
    pub fn create_diary(
        &mut self,
        workspace_id: &WorkspaceId,
        at: NaiveDateTime,
        mut next_id: impl FnMut(NodeKind) -> NodeId,
    ) -> Result<Node, SessionError> {
        let path = DiaryPath::at(at);
        let mut parent: Option<NodeId> = None;
        for title in path.folders() {
            let existing = self
                .store
                .children(workspace_id, parent.as_ref())
                .into_iter()
                .find(|node| node.is_folder() && node.title == title)
                .map(|node| node.id.clone());
            let folder_id = match existing {
                Some(folder_id) => folder_id,
                None => {
                    let mut draft =
                        NewNode::new(next_id(NodeKind::Folder), workspace_id.clone(), NodeKind::Folder, title);
                    if let Some(parent_id) = &parent {
                        draft = draft.under(parent_id.clone());
                    }
                    let folder = self.create_node(draft)?;
                    self.set_collapsed(&folder.id, true)?;
                    folder.id
                }
            };
            parent = Some(folder_id);
        }

        let mut draft = NewNode::new(
            next_id(NodeKind::Diary),
            workspace_id.clone(),
            NodeKind::Diary,
            path.title.as_str(),
        )
        .with_tag(DIARY_TAG);
        if let Some(parent_id) = parent {
            draft = draft.under(parent_id);
        }
        let node = self.store.create_node(draft)?;
        let body = diary_body(at);
        self.store
            .replace_content_body(&node.id, body.clone(), 0)?;
        self.spawn_create_with_body(node.clone(), body);
        self.index = None;
        info!(node = %node.id, title = %node.title, "created diary entry");
        Ok(node)
    }

    /// Creates the record and writes its first body in one queued job, so the
    /// backend version ends up where the store expects it.
    fn spawn_create_with_body(&mut self, record: Node, body: String) {
        self.saved_bodies.insert(record.id.clone(), body.clone());
        self.in_flight.insert(record.id.clone());
        self.dispatch(Box::new(move |gateway: Arc<dyn PersistenceGateway>| -> JobFuture {
            Box::pin(async move {
                let result = match gateway.create_node(&record).await {
                    Ok(()) => gateway.save_content(&record.id, &body, 0).await,
                    Err(err) => Err(err),
                };
                Outcome::Saved {
                    node_id: record.id,
                    body,
                    result,
                }
            })
        }));
    }

    fn push_update(&mut self, node: &Node) {
        let record = node.clone();
        self.spawn_sync("update", node.id.clone(), move |gateway| async move {
            gateway.update_node(&record).await
        });
    }

    // ---- tabs ----------------------------------------------------------

    /// 開啟節點分頁並在需要時載入編輯器狀態。 / Opens a tab for `node_id`, loading state lazily.
    pub fn open_node(&mut self, node_id: &NodeId) -> Result<TabId, SessionError> {
        let node = self
            .store
            .node(node_id)
            .ok_or_else(|| StoreError::NotFound(node_id.clone()))?;
        if !node.kind.needs_content() {
            return Err(SessionError::NotEditable(node_id.clone()));
        }
        let store = &self.store;
        let autosave = &self.autosave;
        let unsaved = &self.unsaved;
        Ok(self
            .tabs
            .open_tab(node, |id| load_editor_state(store, autosave, unsaved, id)))
    }

    pub fn set_active_tab(&mut self, tab_id: TabId) -> Result<(), SessionError> {
        let store = &self.store;
        let autosave = &self.autosave;
        let unsaved = &self.unsaved;
        self.tabs
            .set_active_tab(tab_id, |id| load_editor_state(store, autosave, unsaved, id))?;
        Ok(())
    }

    pub fn reorder_tabs(&mut self, tab_ids: &[TabId]) -> Result<(), SessionError> {
        Ok(self.tabs.reorder_tabs(tab_ids)?)
    }

    /// 關閉分頁前立即送出待存內容。 / Flushes pending edits before closing the tab.
    pub fn close_tab(&mut self, tab_id: TabId) -> Result<EditorTab, SessionError> {
        let node_id = self
            .tabs
            .tab(tab_id)
            .map(|tab| tab.node_id.clone())
            .ok_or(TabError::UnknownTab(tab_id))?;
        self.flush_node(&node_id);
        Ok(self.tabs.close_tab(tab_id)?)
    }

    pub fn close_other_tabs(&mut self, keep: TabId) -> Result<Vec<EditorTab>, SessionError> {
        if self.tabs.tab(keep).is_none() {
            return Err(TabError::UnknownTab(keep).into());
        }
        let others: Vec<NodeId> = self
            .tabs
            .tabs()
            .iter()
            .filter(|tab| tab.id != keep)
            .map(|tab| tab.node_id.clone())
            .collect();
        self.flush_nodes(&others);
        Ok(self.tabs.close_other_tabs(keep)?)
    }

    pub fn close_all_tabs(&mut self) -> Vec<EditorTab> {
        let open: Vec<NodeId> = self.tabs.tabs().iter().map(|tab| tab.node_id.clone()).collect();
        self.flush_nodes(&open);
        self.tabs.close_all_tabs()
    }

    pub fn close_tabs_by_workspace(&mut self, workspace_id: &WorkspaceId) -> Vec<EditorTab> {
        let open: Vec<NodeId> = self
            .tabs
            .tabs_by_workspace(workspace_id)
            .into_iter()
            .map(|tab| tab.node_id.clone())
            .collect();
        self.flush_nodes(&open);
        self.tabs.close_tabs_by_workspace(workspace_id)
    }

    pub fn update_tab_title(&mut self, tab_id: TabId, title: &str) -> Result<(), SessionError> {
        Ok(self.tabs.update_tab_title(tab_id, title)?)
    }

    /// 更新捲動與選取，並視為一次存取。 / Records scroll/selection changes as an access.
    pub fn update_editor_view(
        &mut self,
        node_id: &NodeId,
        scroll_top: f32,
        scroll_left: f32,
        selection: Option<(usize, usize)>,
    ) -> bool {
        self.tabs.update_editor_state(node_id, |state| {
            state.scroll_top = scroll_top;
            state.scroll_left = scroll_left;
            state.selection = selection;
        })
    }

    pub fn evict_lru_editor_states(&mut self, limit: usize) -> Vec<NodeId> {
        self.tabs.evict_lru_editor_states(limit)
    }

    // ---- content & autosave --------------------------------------------

    /// 編輯內容：標記為未儲存並重設防抖計時。 / Edit entry point: marks dirty and restarts the debounce.
    ///
    /// Content equal to the last saved body clears the pending save instead.
    pub fn update_content(&mut self, node_id: &NodeId, content: impl Into<String>) -> Result<(), SessionError> {
        let content = content.into();
        let node = self
            .store
            .node(node_id)
            .ok_or_else(|| StoreError::NotFound(node_id.clone()))?;
        if !node.kind.needs_content() {
            return Err(SessionError::NotEditable(node_id.clone()));
        }

        self.tabs.update_editor_state(node_id, |state| {
            state.serialized = content.clone();
        });

        self.unsaved.remove(node_id);
        let in_flight = self.in_flight.contains(node_id);
        if !in_flight && self.saved_bodies.get(node_id) == Some(&content) {
            self.autosave.cancel(node_id);
            if matches!(self.tabs.status(node_id), Some(TabStatus::Dirty)) {
                self.tabs.set_status(node_id, TabStatus::Open);
            }
            return Ok(());
        }

        if !in_flight {
            self.tabs.set_status(node_id, TabStatus::Dirty);
        }
        self.autosave
            .schedule(node_id.clone(), content, Instant::now());
        Ok(())
    }

    /// 立即儲存，取消尚未到期的防抖。 / Saves now, cancelling the pending debounce.
    ///
    /// Returns whether a write was issued. While a save for the node is in
    /// flight the pending content is queued behind it instead.
    pub fn save_now(&mut self, node_id: &NodeId) -> Result<bool, SessionError> {
        if self.store.node(node_id).is_none() {
            return Err(StoreError::NotFound(node_id.clone()).into());
        }
        if self.in_flight.contains(node_id) {
            self.autosave.expedite(node_id, Instant::now());
            return Ok(false);
        }
        let body = match self
            .autosave
            .take(node_id)
            .or_else(|| self.unsaved.remove(node_id))
        {
            Some(body) => body,
            None => return Ok(false),
        };
        self.spawn_save(node_id.clone(), body);
        Ok(true)
    }

    /// 儲存所有已到期的節點。 / Issues saves for every node whose debounce elapsed.
    pub fn flush_due(&mut self) -> usize {
        let due = self.autosave.due(Instant::now());
        let mut issued = 0;
        for node_id in due {
            if self.in_flight.contains(&node_id) {
                continue;
            }
            match self.autosave.take(&node_id) {
                Some(body) if self.store.node(&node_id).is_some() => {
                    self.spawn_save(node_id, body);
                    issued += 1;
                }
                _ => {}
            }
        }
        issued
    }

    fn flush_nodes(&mut self, node_ids: &[NodeId]) {
        for node_id in node_ids {
            self.flush_node(node_id);
        }
    }

    fn flush_node(&mut self, node_id: &NodeId) {
        if !self.autosave.is_pending(node_id) {
            return;
        }
        if self.in_flight.contains(node_id) {
            self.autosave.expedite(node_id, Instant::now());
        } else if let Some(body) = self.autosave.take(node_id) {
            self.spawn_save(node_id.clone(), body);
        }
    }

    pub fn has_unsaved_changes(&self, node_id: &NodeId) -> bool {
        self.autosave.is_pending(node_id)
            || self.in_flight.contains(node_id)
            || self.unsaved.contains_key(node_id)
            || matches!(
                self.tabs.status(node_id),
                Some(TabStatus::Dirty) | Some(TabStatus::Saving)
            )
    }

    /// 節點的儲存狀態；沒有分頁時依待存內容推斷。
    /// / Save status of `node_id`, inferred from pending work when no tab is open.
    pub fn save_status(&self, node_id: &NodeId) -> TabStatus {
        if let Some(status) = self.tabs.status(node_id) {
            return status.clone();
        }
        if self.in_flight.contains(node_id) {
            TabStatus::Saving
        } else if self.autosave.is_pending(node_id) {
            TabStatus::Dirty
        } else {
            TabStatus::Open
        }
    }

    /// Structural gateway calls that failed since the last call.
    pub fn take_sync_failures(&mut self) -> Vec<SyncFailure> {
        std::mem::take(&mut self.sync_failures)
    }

    /// Number of gateway calls still running.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    // ---- driver --------------------------------------------------------

    /// 套用已完成的閘道呼叫結果。 / Applies every completed gateway call.
    pub fn apply_outcomes(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.apply(outcome);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, outcome: Outcome) {
        self.outstanding = self.outstanding.saturating_sub(1);
        match outcome {
            Outcome::Saved {
                node_id,
                body,
                result,
            } => {
                self.in_flight.remove(&node_id);
                match result {
                    Ok(version) => {
                        self.saves_completed += 1;
                        if self.store.node(&node_id).is_some() {
                            if let Err(err) =
                                self.store.replace_content_body(&node_id, body.clone(), version)
                            {
                                warn!(node = %node_id, error = %err, "saved content has no local record");
                            }
                            self.saved_bodies.insert(node_id.clone(), body);
                            self.unsaved.remove(&node_id);
                            self.index = None;
                        }
                        let status = if self.autosave.is_pending(&node_id) {
                            TabStatus::Dirty
                        } else {
                            TabStatus::Open
                        };
                        self.tabs.set_status(&node_id, status);
                        debug!(node = %node_id, version, "content saved");
                    }
                    Err(err) => {
                        warn!(node = %node_id, error = %err, "content save failed");
                        if !self.autosave.is_pending(&node_id) && self.store.node(&node_id).is_some() {
                            self.unsaved.insert(node_id.clone(), body);
                        }
                        self.tabs
                            .set_status(&node_id, TabStatus::Error(err.to_string()));
                        if let Some(failures) = self.shutdown_failures.as_mut() {
                            failures.push((node_id, err));
                        }
                    }
                }
            }
            Outcome::Synced {
                action,
                node_id,
                result,
            } => {
                if let Err(error) = result {
                    warn!(action, node = %node_id, error = %error, "backend rejected change");
                    self.sync_failures.push(SyncFailure {
                        action,
                        node_id,
                        error,
                    });
                }
            }
        }
    }

    /// 推進一次：套用結果、送出到期儲存，並等待下一個事件。
    /// / One driver step. Returns false once nothing is pending or running.
    pub async fn tick(&mut self) -> bool {
        self.apply_outcomes();
        self.flush_due();
        if self.outstanding == 0 && self.autosave.next_deadline().is_none() {
            return false;
        }
        let in_flight = &self.in_flight;
        let deadline = self
            .autosave
            .next_deadline_except(|node_id| in_flight.contains(node_id));
        let outcome = match deadline {
            Some(deadline) if self.outstanding == 0 => {
                tokio::time::sleep_until(deadline).await;
                None
            }
            Some(deadline) => tokio::select! {
                _ = tokio::time::sleep_until(deadline) => None,
                outcome = self.outcome_rx.recv() => outcome,
            },
            None => self.outcome_rx.recv().await,
        };
        if let Some(outcome) = outcome {
            self.apply(outcome);
        }
        true
    }

    /// 持續推進直到沒有待存內容與進行中的呼叫。
    /// / Drives timers and gateway calls until everything has settled.
    pub async fn run_until_idle(&mut self) {
        while self.tick().await {}
    }

    /// 送出所有待存內容並等待全部完成。 / Flushes every pending edit and waits for all calls.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let saved_before = self.saves_completed;
        self.shutdown_failures = Some(Vec::new());
        loop {
            self.apply_outcomes();
            self.autosave.expedite_all(Instant::now());
            self.flush_due();
            if self.outstanding == 0 && self.autosave.is_empty() {
                break;
            }
            if let Some(outcome) = self.outcome_rx.recv().await {
                self.apply(outcome);
            }
        }
        let report = ShutdownReport {
            saved: self.saves_completed - saved_before,
            failed: self.shutdown_failures.take().unwrap_or_default(),
        };
        info!(saved = report.saved, failed = report.failed.len(), "session flushed");
        report
    }

    // ---- export --------------------------------------------------------

    /// 匯出工作區（或 `root` 子樹）的已儲存內容。
    /// / Exports the saved content of the workspace, or of the subtree at
    /// `root`. Edits still waiting for autosave are not included.
    pub fn export(
        &self,
        workspace_id: &WorkspaceId,
        root: Option<&NodeId>,
        format: ExportFormat,
    ) -> Result<String, ExportError> {
        export_workspace(&self.store, workspace_id, root, format)
    }

    // ---- search --------------------------------------------------------

    fn search_options(&self, workspace_id: Option<&WorkspaceId>) -> SearchOptions {
        SearchOptions {
            limit: self.config.result_limit,
            fuzzy: self.config.fuzzy,
            workspace_id: workspace_id.cloned(),
            ..SearchOptions::default()
        }
    }

    /// 排序搜尋；索引過期時重建。 / Ranked search, rebuilding the index when stale.
    pub fn search(&mut self, query: &str, workspace_id: Option<&WorkspaceId>) -> Vec<SearchHit> {
        let options = self.search_options(workspace_id);
        let weights = self.config.weights;
        let store = &self.store;
        self.index
            .get_or_insert_with(|| SearchIndex::from_store(store, weights))
            .search(query, &options)
    }

    pub fn simple_search(&self, query: &str, workspace_id: Option<&WorkspaceId>) -> Vec<SimpleHit> {
        let options = self.search_options(workspace_id);
        simple_search(self.store.nodes(), self.store.contents(), query, &options)
    }

    pub fn is_index_stale(&self) -> bool {
        self.index.is_none()
    }

    // ---- gateway queue -------------------------------------------------

    fn spawn_save(&mut self, node_id: NodeId, body: String) {
        let expected_version = self
            .store
            .content(&node_id)
            .map(|content| content.version)
            .unwrap_or_default();
        self.tabs.set_status(&node_id, TabStatus::Saving);
        self.in_flight.insert(node_id.clone());
        debug!(node = %node_id, expected_version, "saving content");
        self.dispatch(Box::new(move |gateway: Arc<dyn PersistenceGateway>| -> JobFuture {
            Box::pin(async move {
                let result = gateway
                    .save_content(&node_id, &body, expected_version)
                    .await;
                Outcome::Saved {
                    node_id,
                    body,
                    result,
                }
            })
        }));
    }

    fn spawn_sync<F, Fut>(&mut self, action: &'static str, node_id: NodeId, call: F)
    where
        F: FnOnce(Arc<dyn PersistenceGateway>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), PersistenceError>> + Send + 'static,
    {
        self.dispatch(Box::new(move |gateway: Arc<dyn PersistenceGateway>| -> JobFuture {
            Box::pin(async move {
                let result = call(gateway).await;
                Outcome::Synced {
                    action,
                    node_id,
                    result,
                }
            })
        }));
    }

    /// Queues a gateway call. Calls run one at a time in submission order.
    fn dispatch(&mut self, job: Job) {
        self.outstanding += 1;
        let job = match &self.jobs {
            Some(jobs) => match jobs.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };
        let jobs = spawn_worker(Arc::clone(&self.gateway), self.outcome_tx.clone());
        if let Err(mpsc::error::SendError(_)) = jobs.send(job) {
            self.outstanding -= 1;
            warn!("gateway worker stopped before accepting work");
        }
        self.jobs = Some(jobs);
    }
}

type JobFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;
type Job = Box<dyn FnOnce(Arc<dyn PersistenceGateway>) -> JobFuture + Send>;

fn spawn_worker(
    gateway: Arc<dyn PersistenceGateway>,
    outcomes: mpsc::UnboundedSender<Outcome>,
) -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let outcome = job(Arc::clone(&gateway)).await;
            if outcomes.send(outcome).is_err() {
                break;
            }
        }
    });
    tx
}

fn load_editor_state(
    store: &NodeStore,
    autosave: &AutosaveScheduler,
    unsaved: &HashMap<NodeId, String>,
    node_id: &NodeId,
) -> EditorInstanceState {
    let body = autosave
        .pending_content(node_id)
        .or_else(|| unsaved.get(node_id).map(String::as_str))
        .map(str::to_string)
        .or_else(|| store.content(node_id).map(|content| content.body.clone()))
        .unwrap_or_default();
    EditorInstanceState::new(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;

    fn session(gateway: &Arc<MemoryGateway>) -> WorkspaceSession {
        let shared: Arc<dyn PersistenceGateway> = gateway.clone();
        WorkspaceSession::new(shared, SessionConfig::default())
    }

    fn doc(id: &str) -> NewNode {
        NewNode::new(id, "ws", NodeKind::File, id.to_uppercase())
    }

    #[tokio::test(start_paused = true)]
    async fn edits_are_debounced_into_one_save() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut session = session(&gateway);
        let node = session.create_node(doc("a")).unwrap();
        session.open_node(&node.id).unwrap();

        for step in 1..=5 {
            session.update_content(&node.id, format!("draft {step}")).unwrap();
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert_eq!(session.save_status(&node.id), TabStatus::Dirty);
        session.run_until_idle().await;

        let saves = gateway.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].body, "draft 5");
        assert_eq!(session.save_status(&node.id), TabStatus::Open);
        assert_eq!(session.store().content(&node.id).map(|c| c.version), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn reverting_to_saved_body_cancels_the_save() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut session = session(&gateway);
        let node = session.create_node(doc("a")).unwrap();
        session.open_node(&node.id).unwrap();

        session.update_content(&node.id, "typo").unwrap();
        session.update_content(&node.id, "{}").unwrap();
        assert!(!session.has_unsaved_changes(&node.id));
        session.run_until_idle().await;
        assert!(gateway.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn folders_are_not_editable() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut session = session(&gateway);
        let folder = session
            .create_node(NewNode::new("f", "ws", NodeKind::Folder, "Drafts"))
            .unwrap();
        assert_eq!(
            session.open_node(&folder.id),
            Err(SessionError::NotEditable(folder.id.clone()))
        );
        assert_eq!(
            session.update_content(&folder.id, "x"),
            Err(SessionError::NotEditable(folder.id.clone()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_keeps_the_body_for_retry() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut session = session(&gateway);
        let node = session.create_node(doc("a")).unwrap();
        session.run_until_idle().await;
        gateway.fail_next_saves(1, "disk full");

        session.update_content(&node.id, "precious").unwrap();
        session.run_until_idle().await;
        assert!(session.has_unsaved_changes(&node.id));

        assert_eq!(session.save_now(&node.id), Ok(true));
        session.run_until_idle().await;
        assert!(!session.has_unsaved_changes(&node.id));
        assert_eq!(
            gateway.snapshot().contents[0].body,
            "precious".to_string()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_keeps_versions_in_step_with_backend() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut session = session(&gateway);
        let node = session.create_node(doc("a")).unwrap();
        session.update_content(&node.id, "body").unwrap();
        session.run_until_idle().await;

        let copy = session.duplicate_node(&node.id, NodeId::from("b")).unwrap();
        session.run_until_idle().await;
        assert_eq!(copy.title, "A (copy)");
        assert_eq!(session.store().content(&copy.id).map(|c| c.version), Some(1));

        session.update_content(&copy.id, "edited copy").unwrap();
        session.run_until_idle().await;
        assert!(session.take_sync_failures().is_empty());
        assert_eq!(session.store().content(&copy.id).map(|c| c.version), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn search_sees_saved_content() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut session = session(&gateway);
        let node = session.create_node(doc("a")).unwrap();
        session
            .update_content(&node.id, "A dragon sleeps here")
            .unwrap();
        session.run_until_idle().await;

        let hits = session.search("dragon", None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, node.id);
        assert!(!session.is_index_stale());

        session.rename_node(&node.id, "Renamed").unwrap();
        let hits = session.simple_search("renamed", None);
        assert_eq!(hits.len(), 1);
    }
}
