//! Editing runtime for Quire: persistence gateways, tabs, autosave and the workspace session.
//! Quire 的編輯執行層：持久化閘道、分頁、自動儲存與工作階段。

pub mod autosave;
pub mod export;
pub mod gateway;
pub mod lru;
pub mod session;
pub mod tabs;

pub use autosave::{AutosaveScheduler, PendingSave};
pub use export::{collect_entries, export_workspace, render, ExportEntry, ExportError, ExportFormat};
pub use gateway::{FileGateway, MemoryGateway, PersistenceError, PersistenceGateway, SaveRecord};
pub use lru::LruCache;
pub use session::{SessionConfig, SessionError, ShutdownReport, SyncFailure, WorkspaceSession};
pub use tabs::{
    next_active_tab_id, EditorInstanceState, EditorTab, TabError, TabId, TabManager, TabStatus,
};
