use std::error::Error;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn quire(workspace_file: &Path) -> Result<Command, Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("quire")?;
    cmd.arg("--workspace-file").arg(workspace_file);
    Ok(cmd)
}

fn seed(workspace_file: &Path) -> Result<(), Box<dyn Error>> {
    let steps: [&[&str]; 5] = [
        &["init"],
        &["create", "Dragon Lore", "--id", "lore"],
        &["create", "Travel log", "--id", "log", "--tag", "dragon"],
        &["write", "log", "--text", "We met a dragon near the pass"],
        &["write", "lore", "--text", "Old tales"],
    ];
    for args in steps {
        quire(workspace_file)?.args(args).assert().success();
    }
    Ok(())
}

#[test]
fn ranked_search_prefers_title_matches() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let file = dir.path().join("ws.json");
    seed(&file)?;

    let output = quire(&file)?
        .args(["search", "dragon", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let hits: serde_json::Value = serde_json::from_slice(&output)?;
    let ids: Vec<&str> = hits
        .as_array()
        .map(|hits| hits.iter().filter_map(|hit| hit["node_id"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(ids, vec!["lore", "log"]);
    Ok(())
}

#[test]
fn search_prints_highlighted_excerpts() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let file = dir.path().join("ws.json");
    seed(&file)?;

    quire(&file)?
        .args(["search", "pass"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Search \"pass\" (1 results)")
                .and(predicate::str::contains("Travel log [log]"))
                .and(predicate::str::contains("<mark>pass</mark>")),
        );
    Ok(())
}

#[test]
fn find_reports_where_the_match_starts() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let file = dir.path().join("ws.json");
    seed(&file)?;

    quire(&file)?
        .args(["find", "dragon"])
        .assert()
        .success()
        .stdout(predicate::str::diff(
            "  Dragon Lore [lore] (title at 0)\n  Travel log [log] (body at 9)\n",
        ));
    quire(&file)?
        .args(["find", "unicorn"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No matches found."));
    Ok(())
}

#[test]
fn other_workspaces_are_excluded_by_default() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let file = dir.path().join("ws.json");
    seed(&file)?;
    quire(&file)?
        .args(["--workspace", "work", "create", "Dragon budget", "--id", "budget"])
        .assert()
        .success();

    quire(&file)?
        .args(["--workspace", "work", "find", "dragon"])
        .assert()
        .success()
        .stdout(predicate::str::diff("  Dragon budget [budget] (title at 0)\n"));
    quire(&file)?
        .args(["--workspace", "work", "find", "dragon", "--all-workspaces"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Travel log [log]"));
    Ok(())
}
