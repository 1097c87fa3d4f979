//! Restart and crash-recovery behavior of the proposal store.

use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tidyflow::paths::normalize_dir;
use tidyflow::{NullAudit, Organizer, OrganizerConfig, ScanOptions};

struct Paths {
    temp: TempDir,
    inbox: PathBuf,
    store: PathBuf,
}

fn paths() -> Paths {
    let temp = TempDir::new().unwrap();
    let inbox = normalize_dir(&temp.path().join("inbox"));
    fs::create_dir_all(&inbox).unwrap();
    let store = temp.path().join("state/proposals.json");
    Paths { temp, inbox, store }
}

fn config(paths: &Paths) -> OrganizerConfig {
    OrganizerConfig {
        organize_base_path: paths.temp.path().join("Organized"),
        store_path: paths.store.clone(),
        audit_log_path: paths.temp.path().join("state/audit.jsonl"),
        ..OrganizerConfig::default()
    }
}

async fn organizer(paths: &Paths) -> Organizer {
    Organizer::with_components(config(paths), Arc::new(NullAudit), None)
        .await
        .unwrap()
}

async fn scan(organizer: &Organizer, paths: &Paths) {
    organizer
        .watcher()
        .lock()
        .await
        .scan_directory(&paths.inbox, ScanOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pending_and_cooldowns_survive_restart() {
    let paths = paths();
    fs::write(paths.inbox.join("keep.png"), "x").unwrap();
    fs::write(paths.inbox.join("nope.png"), "x").unwrap();

    {
        let first = organizer(&paths).await;
        scan(&first, &paths).await;
        let nope = first
            .proposals()
            .lock()
            .await
            .get_by_source_path(&paths.inbox.join("nope.png"))
            .unwrap();
        first
            .call_tool("reject_proposal", json!({"id": nope.id.to_string()}))
            .await
            .unwrap();
    }

    let second = organizer(&paths).await;
    {
        let service = second.proposals().lock().await;
        assert_eq!(service.pending_count(), 1);
        assert!(service.has_pending_for_path(&paths.inbox.join("keep.png")));
        assert!(service.is_on_cooldown(&paths.inbox.join("nope.png")));
    }

    // Neither file is proposed again
    scan(&second, &paths).await;
    assert_eq!(second.proposals().lock().await.pending_count(), 1);

    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&paths.store).unwrap()).unwrap();
    assert_eq!(saved["version"], 1);
    assert!(saved["lastModified"].is_string());
    assert_eq!(saved["proposals"].as_array().unwrap().len(), 1);
    assert_eq!(saved["cooldowns"].as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn test_corrupt_store_is_quarantined() {
    let paths = paths();
    fs::create_dir_all(paths.store.parent().unwrap()).unwrap();
    fs::write(&paths.store, "{\"version\": 1, \"proposals\": [").unwrap();

    let organizer = organizer(&paths).await;
    assert_eq!(organizer.proposals().lock().await.pending_count(), 0);

    let quarantined: Vec<String> = fs::read_dir(paths.store.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("proposals.json.corrupt-"))
        .collect();
    assert_eq!(quarantined.len(), 1);

    // The service keeps working after recovery
    fs::write(paths.inbox.join("fresh.png"), "x").unwrap();
    scan(&organizer, &paths).await;
    assert_eq!(organizer.proposals().lock().await.pending_count(), 1);
    assert!(paths.store.exists());
}

#[tokio::test]
async fn test_interrupted_write_leaves_previous_state() {
    let paths = paths();
    fs::write(paths.inbox.join("a.png"), "x").unwrap();
    {
        let first = organizer(&paths).await;
        scan(&first, &paths).await;
    }

    // A crash between temp write and rename leaves a stray temp file
    let stray = paths
        .store
        .parent()
        .unwrap()
        .join(".tmp_00000000-0000-0000-0000-000000000000");
    fs::write(&stray, "{ half written").unwrap();

    let second = organizer(&paths).await;
    assert_eq!(second.proposals().lock().await.pending_count(), 1);
}

#[tokio::test]
async fn test_approved_and_cleared_are_not_reloaded() {
    let paths = paths();
    fs::write(paths.inbox.join("a.png"), "x").unwrap();
    fs::write(paths.inbox.join("b.png"), "x").unwrap();
    fs::write(paths.inbox.join("c.png"), "x").unwrap();

    {
        let first = organizer(&paths).await;
        scan(&first, &paths).await;
        let a = first
            .proposals()
            .lock()
            .await
            .get_by_source_path(&paths.inbox.join("a.png"))
            .unwrap();
        first
            .call_tool("approve_proposal", json!({"id": a.id.to_string()}))
            .await
            .unwrap();
    }
    {
        let second = organizer(&paths).await;
        assert_eq!(second.proposals().lock().await.pending_count(), 2);
        let out = second
            .call_tool("clear_all_proposals", json!({}))
            .await
            .unwrap();
        assert_eq!(out["cleared"], 2);
    }

    let third = organizer(&paths).await;
    assert_eq!(third.proposals().lock().await.pending_count(), 0);
    assert!(paths.inbox.join("b.png").exists());
}

#[tokio::test]
async fn test_store_has_a_single_owner() {
    let paths = paths();
    fs::write(paths.inbox.join("a.png"), "x").unwrap();

    let owner = organizer(&paths).await;
    scan(&owner, &paths).await;

    // A second instance (e.g. the CLI while `watch` runs) is turned away
    let err = match Organizer::with_components(config(&paths), Arc::new(NullAudit), None).await {
        Ok(_) => panic!("second instance opened a locked store"),
        Err(e) => format!("{:#}", e),
    };
    assert!(err.contains("in use by another tidyflow process"), "{}", err);

    let a = owner
        .proposals()
        .lock()
        .await
        .get_by_source_path(&paths.inbox.join("a.png"))
        .unwrap();
    owner
        .call_tool("approve_proposal", json!({"id": a.id.to_string()}))
        .await
        .unwrap();
    fs::write(paths.inbox.join("b.png"), "x").unwrap();
    scan(&owner, &paths).await;
    drop(owner);

    let reopened = organizer(&paths).await;
    let service = reopened.proposals().lock().await;
    assert_eq!(service.pending_count(), 1);
    assert!(service.has_pending_for_path(&paths.inbox.join("b.png")));
    assert!(!service.has_pending_for_path(&paths.inbox.join("a.png")));
}
