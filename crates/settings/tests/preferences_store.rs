use quire_settings::{Preferences, PreferencesStore};
use std::fs;
use tempfile::tempdir;

#[test]
fn load_missing_file_returns_defaults() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("preferences.json");

    let store = PreferencesStore::load(&path).expect("load defaults");
    let prefs = store.preferences();
    assert!(prefs.autosave.enabled);
    assert_eq!(prefs.autosave.delay_ms, 800);
    assert_eq!(prefs.editor.cache_limit, 10);
    assert_eq!(prefs.search.title_weight, 10);
    assert_eq!(prefs.search.tags_weight, 5);
    assert_eq!(prefs.search.body_weight, 1);
    assert_eq!(prefs.search.result_limit, 50);
    assert!(prefs.search.fuzzy);
    assert!(!path.exists(), "loading defaults must not create the file");
}

#[test]
fn save_and_reload_roundtrip() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("nested").join("preferences.json");

    let mut store = PreferencesStore::new(path.clone(), Preferences::default());
    store
        .update(|prefs| {
            prefs.autosave.delay_ms = 1_500;
            prefs.editor.cache_limit = 4;
            prefs.search.fuzzy = false;
        })
        .expect("save");

    let reloaded = PreferencesStore::load(&path).expect("reload");
    assert_eq!(reloaded.preferences().autosave.delay_ms, 1_500);
    assert_eq!(reloaded.preferences().editor.cache_limit, 4);
    assert!(!reloaded.preferences().search.fuzzy);
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn partial_file_is_filled_with_defaults_and_clamped() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("preferences.json");
    fs::write(
        &path,
        r#"{
            "version": 0,
            "autosave": { "delay_ms": 999999 },
            "editor": { "cache_limit": 10000 }
        }"#,
    )
    .expect("write legacy prefs");

    let store = PreferencesStore::load(&path).expect("load partial file");
    let prefs = store.preferences();
    assert_eq!(prefs.version, 1, "version 0 should be upgraded");
    assert!(prefs.autosave.enabled, "missing flag falls back to default");
    assert_eq!(prefs.autosave.delay_ms, 60_000);
    assert_eq!(prefs.editor.cache_limit, 256);
    assert_eq!(prefs.search.result_limit, 50);
}

#[test]
fn malformed_file_reports_parse_error() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("preferences.json");
    fs::write(&path, "{ nope").expect("write garbage");

    let err = PreferencesStore::load(&path).expect_err("parse should fail");
    assert!(err.to_string().contains("failed to parse preferences"));
}
