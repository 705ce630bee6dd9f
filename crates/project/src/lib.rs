//! Workspace tree primitives for Quire: nodes, tree operations and the node store.
//! Quire 的工作區樹基礎模組：節點、樹狀操作與節點儲存區。

mod util;

pub mod diary;
pub mod node;
pub mod snapshot;
pub mod store;
pub mod tree;

pub use diary::{diary_body, DiaryPath, DIARY_ROOT_FOLDER, DIARY_TAG};
pub use node::{Content, ContentKind, NewNode, Node, NodeId, NodeKind, SiblingKey, WorkspaceId};
pub use snapshot::{Snapshot, SnapshotStore, SnapshotStoreError};
pub use store::{MoveOutcome, NodeStore, StoreError};
pub use tree::{
    build_tree, flatten_tree, would_create_cycle, FlatNode, FlattenIter, Forest,
};
pub use util::{current_timestamp_ms, write_atomic};
