use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use quire_core::{
    ExportFormat, FileGateway, MemoryGateway, PersistenceGateway, SessionConfig, SessionError,
    TabId, WorkspaceSession,
};
use quire_project::{NewNode, NodeId, NodeKind, StoreError, WorkspaceId};
use tempfile::tempdir;

fn memory_session() -> (Arc<MemoryGateway>, WorkspaceSession) {
    let gateway = Arc::new(MemoryGateway::new());
    let shared: Arc<dyn PersistenceGateway> = gateway.clone();
    (gateway, WorkspaceSession::new(shared, SessionConfig::default()))
}

fn create(session: &mut WorkspaceSession, draft: NewNode) -> NodeId {
    session.create_node(draft).expect("create node").id
}

fn doc(id: &str, title: &str) -> NewNode {
    NewNode::new(id, "ws", NodeKind::File, title)
}

fn order_of(gateway: &MemoryGateway, id: &str) -> (Option<String>, u32) {
    let snapshot = gateway.snapshot();
    let node = snapshot
        .nodes
        .iter()
        .find(|node| node.id.as_str() == id)
        .expect("node persisted");
    (
        node.parent_id.as_ref().map(|parent| parent.as_str().to_string()),
        node.order,
    )
}

#[tokio::test(start_paused = true)]
async fn moves_keep_store_and_backend_in_step() {
    let (gateway, mut session) = memory_session();
    let drafts = create(
        &mut session,
        NewNode::new("drafts", "ws", NodeKind::Folder, "Drafts"),
    );
    let ch1 = create(&mut session, doc("ch1", "Chapter 1"));
    let ch2 = create(&mut session, doc("ch2", "Chapter 2"));

    session.move_node(&ch2, Some(&drafts), None).unwrap();
    let outcome = session.move_node(&ch1, Some(&drafts), Some(0)).unwrap();
    assert_eq!(outcome.node.order, 0);
    session.run_until_idle().await;
    assert!(session.take_sync_failures().is_empty());

    let ws = WorkspaceId::from("ws");
    let children: Vec<&str> = session
        .store()
        .children(&ws, Some(&drafts))
        .into_iter()
        .map(|node| node.id.as_str())
        .collect();
    assert_eq!(children, vec!["ch1", "ch2"]);
    assert_eq!(order_of(&gateway, "ch1"), (Some("drafts".into()), 0));
    assert_eq!(order_of(&gateway, "ch2"), (Some("drafts".into()), 1));
    assert_eq!(order_of(&gateway, "drafts"), (None, 0));
}

#[tokio::test(start_paused = true)]
async fn moving_a_folder_into_its_descendant_is_rejected() {
    let (gateway, mut session) = memory_session();
    let outer = create(
        &mut session,
        NewNode::new("outer", "ws", NodeKind::Folder, "Outer"),
    );
    let inner = create(
        &mut session,
        NewNode::new("inner", "ws", NodeKind::Folder, "Inner").under("outer"),
    );
    session.run_until_idle().await;

    let err = session.move_node(&outer, Some(&inner), None).unwrap_err();
    assert_eq!(
        err,
        SessionError::Store(StoreError::Cycle {
            node: outer.clone(),
            parent: inner.clone(),
        })
    );
    assert_eq!(session.outstanding(), 0);
    assert_eq!(order_of(&gateway, "inner"), (Some("outer".into()), 0));
}

#[tokio::test(start_paused = true)]
async fn deleting_a_folder_closes_tabs_and_drops_pending_saves() {
    let (gateway, mut session) = memory_session();
    create(
        &mut session,
        NewNode::new("f", "ws", NodeKind::Folder, "Folder"),
    );
    let inside = create(&mut session, doc("a", "Inside").under("f"));
    session.open_node(&inside).unwrap();
    session.update_content(&inside, "never saved").unwrap();

    let removed = session.delete_node(&NodeId::from("f")).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(session.tabs().is_empty());
    session.run_until_idle().await;

    assert!(gateway.saves().is_empty());
    assert!(gateway.snapshot().nodes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn editor_cache_keeps_the_active_tab_loaded() {
    let (_gateway, mut session) = memory_session();
    let ids: Vec<NodeId> = (1..=11)
        .map(|n| create(&mut session, doc(&format!("doc{n:02}"), &format!("Doc {n}"))))
        .collect();
    let tabs: Vec<TabId> = ids
        .iter()
        .map(|id| session.open_node(id).unwrap())
        .collect();

    assert_eq!(session.tabs().len(), 11);
    assert_eq!(session.tabs().loaded_states(), 10);
    assert!(session.tabs().editor_state(&ids[0]).is_none());

    session.set_active_tab(tabs[2]).unwrap();
    session.set_active_tab(tabs[0]).unwrap();
    assert!(session.tabs().editor_state(&ids[0]).is_some());
    assert!(session.tabs().editor_state(&ids[1]).is_none());
    assert!(session.tabs().editor_state(&ids[2]).is_some());

    let evicted = session.evict_lru_editor_states(0);
    assert_eq!(evicted.len(), 9);
    assert_eq!(session.tabs().loaded_states(), 1);
    assert!(session.tabs().editor_state(&ids[0]).is_some());
    session.run_until_idle().await;
}

#[tokio::test(start_paused = true)]
async fn evicted_state_reloads_unsaved_edits() {
    let (_gateway, mut session) = memory_session();
    let ids: Vec<NodeId> = (1..=3)
        .map(|n| create(&mut session, doc(&format!("d{n}"), &format!("D{n}"))))
        .collect();
    let first = session.open_node(&ids[0]).unwrap();
    session.update_content(&ids[0], "kept in the scheduler").unwrap();
    session.open_node(&ids[1]).unwrap();
    session.evict_lru_editor_states(1);
    assert!(session.tabs().editor_state(&ids[0]).is_none());

    session.set_active_tab(first).unwrap();
    assert_eq!(
        session
            .tabs()
            .editor_state(&ids[0])
            .map(|state| state.serialized.as_str()),
        Some("kept in the scheduler")
    );
    session.run_until_idle().await;
}

#[tokio::test(start_paused = true)]
async fn closing_tabs_moves_focus_right_then_left() {
    let (_gateway, mut session) = memory_session();
    let a = create(&mut session, doc("a", "A"));
    let b = create(&mut session, doc("b", "B"));
    let c = create(&mut session, doc("c", "C"));
    let tab_a = session.open_node(&a).unwrap();
    let tab_b = session.open_node(&b).unwrap();
    let tab_c = session.open_node(&c).unwrap();

    session.set_active_tab(tab_b).unwrap();
    session.close_tab(tab_b).unwrap();
    assert_eq!(session.tabs().active_tab_id(), Some(tab_c));
    session.close_tab(tab_c).unwrap();
    assert_eq!(session.tabs().active_tab_id(), Some(tab_a));
    session.close_tab(tab_a).unwrap();
    assert_eq!(session.tabs().active_tab_id(), None);
    session.run_until_idle().await;
}

#[tokio::test(start_paused = true)]
async fn batch_close_flushes_pending_edits_of_closed_tabs() {
    let (gateway, mut session) = memory_session();
    let a = create(&mut session, doc("a", "A"));
    let b = create(&mut session, doc("b", "B"));
    let c = create(&mut session, doc("c", "C"));
    session.open_node(&a).unwrap();
    let tab_b = session.open_node(&b).unwrap();
    session.open_node(&c).unwrap();
    session.run_until_idle().await;

    session.update_content(&a, "alpha").unwrap();
    session.update_content(&b, "beta").unwrap();
    session.update_content(&c, "gamma").unwrap();
    let closed = session.close_other_tabs(tab_b).unwrap();
    assert_eq!(closed.len(), 2);
    assert_eq!(session.tabs().active_tab_id(), Some(tab_b));
    assert!(session.has_unsaved_changes(&b));
    while session.outstanding() > 0 {
        session.tick().await;
    }
    let mut saved: Vec<String> = gateway
        .saves()
        .into_iter()
        .map(|save| save.body)
        .collect();
    saved.sort();
    assert_eq!(saved, vec!["alpha", "gamma"]);

    assert_eq!(session.close_all_tabs().len(), 1);
    assert!(session.tabs().tabs().is_empty());
    session.run_until_idle().await;
    assert!(gateway.saves().iter().any(|save| save.body == "beta"));
    assert!(!session.has_unsaved_changes(&b));
}

#[tokio::test(start_paused = true)]
async fn renaming_updates_tab_and_backend() {
    let (gateway, mut session) = memory_session();
    let a = create(&mut session, doc("a", "Draft"));
    let tab = session.open_node(&a).unwrap();
    session.rename_node(&a, "Final").unwrap();
    session.add_tag(&a, "ready").unwrap();
    session.run_until_idle().await;

    assert_eq!(session.tabs().tab(tab).map(|t| t.title.as_str()), Some("Final"));
    let snapshot = gateway.snapshot();
    assert_eq!(snapshot.nodes[0].title, "Final");
    assert!(snapshot.nodes[0].tags.contains("ready"));
    assert_eq!(session.search("ready", None)[0].node_id, a);
}

#[tokio::test]
async fn file_backed_session_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("workspace.json");
    let ws = WorkspaceId::from("ws");

    {
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(FileGateway::open(&path).unwrap());
        let mut session = WorkspaceSession::new(gateway, SessionConfig::default());
        let a = create(&mut session, doc("a", "Notes"));
        session.update_content(&a, "remember the milk").unwrap();
        let report = session.shutdown().await;
        assert_eq!(report.saved, 1);
    }

    let gateway: Arc<dyn PersistenceGateway> = Arc::new(FileGateway::open(&path).unwrap());
    let mut session = WorkspaceSession::new(gateway, SessionConfig::default());
    assert_eq!(session.load_workspace(&ws).await.unwrap(), 1);
    let a = NodeId::from("a");
    assert_eq!(
        session.store().content(&a).map(|content| content.body.as_str()),
        Some("remember the milk")
    );

    session.update_content(&a, "remember the milk and eggs").unwrap();
    let report = session.shutdown().await;
    assert_eq!(report.saved, 1);
    assert!(report.failed.is_empty());
    assert_eq!(session.simple_search("eggs", Some(&ws)).len(), 1);
}

fn moment(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .and_then(|date| date.and_hms_opt(hour, 0, 0))
        .expect("valid date")
}

#[tokio::test(start_paused = true)]
async fn diary_entries_share_date_folders() {
    let (gateway, mut session) = memory_session();
    let ws = WorkspaceId::from("ws");
    let mut counter = 0;
    let mut next_id = |kind: NodeKind| {
        counter += 1;
        NodeId::new(format!("{kind}-{counter}"))
    };

    let morning = session.create_diary(&ws, moment(1, 9), &mut next_id).unwrap();
    let evening = session.create_diary(&ws, moment(1, 21), &mut next_id).unwrap();
    let next_day = session.create_diary(&ws, moment(2, 9), &mut next_id).unwrap();
    session.run_until_idle().await;
    assert!(session.take_sync_failures().is_empty());

    assert_eq!(morning.parent_id, evening.parent_id);
    assert_ne!(morning.parent_id, next_day.parent_id);
    assert_eq!(morning.title, "diary-20240101-09-00-00");
    assert!(morning.tags.contains("diary"));

    let path: Vec<String> = session
        .store()
        .path(&evening.id)
        .into_iter()
        .map(|node| node.title.clone())
        .collect();
    assert_eq!(
        path,
        vec![
            "Diary",
            "year-2024-Dragon",
            "month-01-January",
            "day-01-Monday",
            "diary-20240101-21-00-00"
        ]
    );
    let folders: Vec<_> = session
        .store()
        .nodes_in_workspace(&ws)
        .into_iter()
        .filter(|node| node.is_folder())
        .collect();
    assert_eq!(folders.len(), 5);
    assert!(folders.iter().all(|folder| folder.collapsed));

    let stored = gateway.snapshot();
    let content = stored
        .contents
        .iter()
        .find(|content| content.node_id == morning.id)
        .expect("diary content persisted");
    assert_eq!(content.version, 1);
    assert!(content.body.contains("Monday, January 1, 2024"));
    assert_eq!(session.store().content(&morning.id).map(|c| c.version), Some(1));
    assert!(!session.has_unsaved_changes(&morning.id));
}

#[tokio::test(start_paused = true)]
async fn export_walks_saved_content_in_tree_order() {
    let (_gateway, mut session) = memory_session();
    let ws = WorkspaceId::from("ws");
    let book = create(&mut session, NewNode::new("book", "ws", NodeKind::Folder, "Book"));
    let ch1 = create(&mut session, doc("ch1", "Chapter 1").under("book"));
    session.set_collapsed(&book, true).unwrap();
    session.update_content(&ch1, "Plain opening").unwrap();
    session.run_until_idle().await;

    let markdown = session.export(&ws, None, ExportFormat::Markdown).unwrap();
    assert_eq!(markdown, "# Book\n\n## Chapter 1\n\nPlain opening\n");
    let org = session.export(&ws, Some(&ch1), ExportFormat::Org).unwrap();
    assert_eq!(org, "* Chapter 1\nPlain opening\n");
}
