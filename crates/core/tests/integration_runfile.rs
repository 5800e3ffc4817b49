//! Run-file tracking against the real process table

use std::process::{Child, Command};
use tempfile::TempDir;
use vessel_core::runfile::RunDir;

fn sleeper() -> Child {
    Command::new("sleep").arg("30").spawn().unwrap()
}

#[test]
fn test_live_and_dead_pids() {
    let dir = TempDir::new().unwrap();
    let run_dir = RunDir::new(dir.path().join("run"));

    let mut children = vec![sleeper(), sleeper()];
    let mut guards = Vec::new();
    for child in &children {
        guards.push(run_dir.create_for(child.id(), "child").unwrap());
    }
    guards.push(run_dir.create("self").unwrap());
    for dead in [999_999_990u32, 999_999_991] {
        guards.push(run_dir.create_for(dead, "dead").unwrap());
    }

    assert_eq!(run_dir.count().unwrap(), 3);
    assert_eq!(run_dir.count_and_clean().unwrap(), 3);
    assert!(!dir.path().join("run/999999990").exists());
    assert!(!dir.path().join("run/999999991").exists());

    for child in &mut children {
        child.kill().unwrap();
        child.wait().unwrap();
    }
    assert_eq!(run_dir.count_and_clean().unwrap(), 1);

    // Guards remove whatever is left
    drop(guards);
    assert_eq!(run_dir.count().unwrap(), 0);
}

#[test]
fn test_foreign_entries_are_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run");
    std::fs::create_dir_all(path.join("subdir")).unwrap();
    std::fs::write(path.join("notes.txt"), "x").unwrap();
    let run_dir = RunDir::new(&path);

    let _guard = run_dir.create("self").unwrap();
    assert_eq!(run_dir.count_and_clean().unwrap(), 1);
    assert!(path.join("notes.txt").exists());
}
