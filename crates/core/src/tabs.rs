use std::fmt;

use quire_project::{Node, NodeId, NodeKind, WorkspaceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::lru::LruCache;

/// 分頁識別碼。 / Identifier of an open tab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(u64);

impl TabId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

/// 分頁的儲存狀態。 / Save state of a tab.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabStatus {
    Open,
    Dirty,
    Saving,
    /// 保留錯誤訊息以供顯示。 / Keeps the failure message for display.
    Error(String),
}

impl TabStatus {
    pub fn is_dirty(&self) -> bool {
        matches!(self, TabStatus::Dirty | TabStatus::Saving | TabStatus::Error(_))
    }
}

/// 輕量的分頁中繼資料。 / Lightweight metadata of an open editing session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorTab {
    pub id: TabId,
    pub node_id: NodeId,
    pub workspace_id: WorkspaceId,
    pub kind: NodeKind,
    pub title: String,
    pub status: TabStatus,
    /// 分頁列中的位置。 / Position in the tab strip.
    pub order: usize,
    /// 單調遞增的存取戳記。 / Monotonic access stamp.
    pub last_accessed: u64,
}

impl EditorTab {
    pub fn is_dirty(&self) -> bool {
        self.status.is_dirty()
    }
}

/// 可被淘汰的編輯器實體狀態。 / Heavy editor state that may be evicted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorInstanceState {
    pub serialized: String,
    pub scroll_top: f32,
    pub scroll_left: f32,
    pub selection: Option<(usize, usize)>,
}

impl EditorInstanceState {
    pub fn new(serialized: impl Into<String>) -> Self {
        Self {
            serialized: serialized.into(),
            ..Self::default()
        }
    }
}

/// 分頁操作錯誤。 / Errors raised by tab operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TabError {
    #[error("unknown tab {0}")]
    UnknownTab(TabId),
    #[error("invalid tab order: {0}")]
    InvalidReorder(String),
}

/// 關閉分頁後的新焦點：右側優先，其次左側，沒有則為 `None`。
/// / Next active tab after closing `closing`: right neighbour, then left, then `None`.
///
/// Only the strip position matters; recency is ignored. When the closed tab
/// was not active the active tab stays.
pub fn next_active_tab_id(
    tabs: &[EditorTab],
    closing: TabId,
    active: Option<TabId>,
) -> Option<TabId> {
    if active != Some(closing) {
        return active;
    }
    let position = tabs.iter().position(|tab| tab.id == closing)?;
    tabs.get(position + 1)
        .or_else(|| position.checked_sub(1).and_then(|left| tabs.get(left)))
        .map(|tab| tab.id)
}

/// 分頁與編輯器狀態管理器。 / Owns open tabs and the bounded editor-state cache.
#[derive(Debug)]
pub struct TabManager {
    tabs: Vec<EditorTab>,
    active: Option<TabId>,
    states: LruCache<NodeId, EditorInstanceState>,
    cache_limit: usize,
    next_id: u64,
    clock: u64,
}

impl Default for TabManager {
    fn default() -> Self {
        Self::new(10)
    }
}

impl TabManager {
    pub fn new(cache_limit: usize) -> Self {
        Self {
            tabs: Vec::new(),
            active: None,
            states: LruCache::new(),
            cache_limit: cache_limit.max(1),
            next_id: 1,
            clock: 0,
        }
    }

    pub fn cache_limit(&self) -> usize {
        self.cache_limit
    }

    /// 依分頁列順序回傳所有分頁。 / Tabs in strip order.
    pub fn tabs(&self) -> &[EditorTab] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn tab(&self, id: TabId) -> Option<&EditorTab> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        self.active
    }

    pub fn active_tab(&self) -> Option<&EditorTab> {
        self.active.and_then(|id| self.tab(id))
    }

    pub fn find_tab_by_node_id(&self, node_id: &NodeId) -> Option<&EditorTab> {
        self.tabs.iter().find(|tab| &tab.node_id == node_id)
    }

    pub fn tabs_by_workspace(&self, workspace_id: &WorkspaceId) -> Vec<&EditorTab> {
        self.tabs
            .iter()
            .filter(|tab| &tab.workspace_id == workspace_id)
            .collect()
    }

    pub fn has_dirty_tabs(&self) -> bool {
        self.tabs.iter().any(EditorTab::is_dirty)
    }

    /// 讀取快取中的編輯器狀態，不影響最近使用順序。
    /// / Cached editor state for `node_id`, without touching recency.
    pub fn editor_state(&self, node_id: &NodeId) -> Option<&EditorInstanceState> {
        self.states.peek(node_id)
    }

    pub fn loaded_states(&self) -> usize {
        self.states.len()
    }

    /// 開啟節點；已開啟則直接啟用。 / Opens `node`, or activates its existing tab.
    ///
    /// `loader` runs only when the editor state is not cached.
    pub fn open_tab(
        &mut self,
        node: &Node,
        loader: impl FnOnce(&NodeId) -> EditorInstanceState,
    ) -> TabId {
        let id = match self.find_tab_by_node_id(&node.id) {
            Some(existing) => existing.id,
            None => {
                let id = TabId(self.next_id);
                self.next_id += 1;
                self.tabs.push(EditorTab {
                    id,
                    node_id: node.id.clone(),
                    workspace_id: node.workspace_id.clone(),
                    kind: node.kind,
                    title: node.title.clone(),
                    status: TabStatus::Open,
                    order: self.tabs.len(),
                    last_accessed: 0,
                });
                debug!(tab = %id, node = %node.id, "opened tab");
                id
            }
        };
        self.activate(id, loader);
        id
    }

    /// 切換焦點分頁，必要時重新載入狀態。 / Activates `id`, reloading its state if evicted.
    pub fn set_active_tab(
        &mut self,
        id: TabId,
        loader: impl FnOnce(&NodeId) -> EditorInstanceState,
    ) -> Result<(), TabError> {
        if self.tab(id).is_none() {
            return Err(TabError::UnknownTab(id));
        }
        self.activate(id, loader);
        Ok(())
    }

    fn activate(&mut self, id: TabId, loader: impl FnOnce(&NodeId) -> EditorInstanceState) {
        self.clock += 1;
        let stamp = self.clock;
        let Some(tab) = self.tabs.iter_mut().find(|tab| tab.id == id) else {
            return;
        };
        tab.last_accessed = stamp;
        let node_id = tab.node_id.clone();
        self.active = Some(id);
        if !self.states.touch(&node_id) {
            let state = loader(&node_id);
            self.states.insert(node_id, state);
        }
        self.evict_lru_editor_states(self.cache_limit);
    }

    /// 關閉分頁並移除其快取狀態。 / Closes `id` and drops its cached state.
    pub fn close_tab(&mut self, id: TabId) -> Result<EditorTab, TabError> {
        let position = self
            .tabs
            .iter()
            .position(|tab| tab.id == id)
            .ok_or(TabError::UnknownTab(id))?;
        self.active = next_active_tab_id(&self.tabs, id, self.active);
        let closed = self.tabs.remove(position);
        self.states.remove(&closed.node_id);
        self.renumber();
        if let Some(active) = self.active {
            self.clock += 1;
            let stamp = self.clock;
            if let Some(tab) = self.tabs.iter_mut().find(|tab| tab.id == active) {
                tab.last_accessed = stamp;
                self.states.touch(&tab.node_id);
            }
        }
        debug!(tab = %id, active = ?self.active, "closed tab");
        Ok(closed)
    }

    /// 關閉除 `keep` 以外的分頁。 / Closes every tab except `keep`.
    pub fn close_other_tabs(&mut self, keep: TabId) -> Result<Vec<EditorTab>, TabError> {
        if self.tab(keep).is_none() {
            return Err(TabError::UnknownTab(keep));
        }
        let (kept, closed): (Vec<_>, Vec<_>) =
            self.tabs.drain(..).partition(|tab| tab.id == keep);
        self.tabs = kept;
        for tab in &closed {
            self.states.remove(&tab.node_id);
        }
        self.active = Some(keep);
        self.renumber();
        Ok(closed)
    }

    pub fn close_all_tabs(&mut self) -> Vec<EditorTab> {
        self.states.clear();
        self.active = None;
        std::mem::take(&mut self.tabs)
    }

    /// 關閉屬於指定工作區的所有分頁。 / Closes every tab of `workspace_id`.
    pub fn close_tabs_by_workspace(&mut self, workspace_id: &WorkspaceId) -> Vec<EditorTab> {
        let ids: Vec<TabId> = self
            .tabs_by_workspace(workspace_id)
            .into_iter()
            .map(|tab| tab.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.close_tab(id).ok())
            .collect()
    }

    /// 依傳入順序重新排列分頁；不影響最近使用順序。
    /// / Reassigns strip positions; recency is unaffected.
    ///
    /// Tabs missing from `ids` keep their relative order after the listed ones.
    pub fn reorder_tabs(&mut self, ids: &[TabId]) -> Result<(), TabError> {
        for (index, id) in ids.iter().enumerate() {
            if ids[..index].contains(id) {
                return Err(TabError::InvalidReorder(format!("{id} listed twice")));
            }
            if self.tab(*id).is_none() {
                return Err(TabError::UnknownTab(*id));
            }
        }
        let mut remaining = std::mem::take(&mut self.tabs);
        let mut ordered = Vec::with_capacity(remaining.len());
        for id in ids {
            if let Some(position) = remaining.iter().position(|tab| tab.id == *id) {
                ordered.push(remaining.remove(position));
            }
        }
        ordered.extend(remaining);
        self.tabs = ordered;
        self.renumber();
        Ok(())
    }

    pub fn update_tab_title(&mut self, id: TabId, title: impl Into<String>) -> Result<(), TabError> {
        let tab = self
            .tabs
            .iter_mut()
            .find(|tab| tab.id == id)
            .ok_or(TabError::UnknownTab(id))?;
        tab.title = title.into();
        Ok(())
    }

    /// 節點改名時同步分頁標題。 / Mirrors a node rename onto its tab.
    pub fn rename_node_tab(&mut self, node_id: &NodeId, title: &str) {
        if let Some(tab) = self.tabs.iter_mut().find(|tab| &tab.node_id == node_id) {
            tab.title = title.to_string();
        }
    }

    pub fn status(&self, node_id: &NodeId) -> Option<&TabStatus> {
        self.find_tab_by_node_id(node_id).map(|tab| &tab.status)
    }

    pub fn set_status(&mut self, node_id: &NodeId, status: TabStatus) {
        if let Some(tab) = self.tabs.iter_mut().find(|tab| &tab.node_id == node_id) {
            tab.status = status;
        }
    }

    /// 更新快取中的編輯器狀態並視為一次存取。
    /// / Updates cached editor state and counts as an access.
    pub fn update_editor_state(
        &mut self,
        node_id: &NodeId,
        update: impl FnOnce(&mut EditorInstanceState),
    ) -> bool {
        let Some(state) = self.states.get_mut(node_id) else {
            return false;
        };
        update(state);
        self.clock += 1;
        let stamp = self.clock;
        if let Some(tab) = self.tabs.iter_mut().find(|tab| &tab.node_id == node_id) {
            tab.last_accessed = stamp;
        }
        true
    }

    /// 淘汰最久未使用的狀態直到數量不超過 `limit`，永不淘汰焦點分頁。
    /// / Evicts least recently used states until `len <= limit`, never the active tab's.
    pub fn evict_lru_editor_states(&mut self, limit: usize) -> Vec<NodeId> {
        let protected = self.active_tab().map(|tab| tab.node_id.clone());
        let mut evicted = Vec::new();
        while self.states.len() > limit {
            match self.states.pop_lru_excluding(protected.as_ref()) {
                Some((node_id, _)) => evicted.push(node_id),
                None => break,
            }
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted editor states");
        }
        evicted
    }

    fn renumber(&mut self) {
        for (index, tab) in self.tabs.iter_mut().enumerate() {
            tab.order = index;
        }
    }
}
