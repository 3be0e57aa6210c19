use pt_core::history::{CommandHistoryStore, MAX_HISTORY_ENTRIES};

#[tokio::test]
async fn resubmitted_command_moves_to_front() {
    let dir = tempfile::tempdir().unwrap();
    let store = CommandHistoryStore::new(dir.path().join("history.json"));

    store.append("ls").await.unwrap();
    store.append("pwd").await.unwrap();
    let h = store.append("ls").await.unwrap();
    assert_eq!(h.commands, vec!["ls", "pwd"]);

    // Persisted form matches what append returned.
    let reloaded = store.load().await.unwrap();
    assert_eq!(reloaded.commands, vec!["ls", "pwd"]);
    assert!(reloaded.last_updated.is_some());
}

#[tokio::test]
async fn append_trims_whitespace() {
    let dir = tempfile::tempdir().unwrap();
    let store = CommandHistoryStore::new(dir.path().join("history.json"));
    let h = store.append("  git status \n").await.unwrap();
    assert_eq!(h.commands, vec!["git status"]);
}

#[tokio::test]
async fn oldest_command_evicted_past_cap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");

    // Seed the file directly so the test does not need 1000 round trips.
    let seeded: Vec<String> = (0..MAX_HISTORY_ENTRIES)
        .rev()
        .map(|i| format!("cmd-{i}"))
        .collect();
    let doc = serde_json::json!({ "commands": seeded, "last_updated": null });
    std::fs::write(&path, doc.to_string()).unwrap();

    let store = CommandHistoryStore::new(&path);
    assert_eq!(store.load().await.unwrap().commands.len(), MAX_HISTORY_ENTRIES);

    let h = store.append("cmd-new").await.unwrap();
    assert_eq!(h.commands.len(), MAX_HISTORY_ENTRIES);
    assert_eq!(h.commands[0], "cmd-new");
    assert!(!h.commands.contains(&"cmd-0".to_string()), "oldest should be evicted");
    assert_eq!(h.commands.last().unwrap(), "cmd-1");
}

#[tokio::test]
async fn creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("history.json");
    let store = CommandHistoryStore::new(&path);
    store.append("echo hi").await.unwrap();
    assert!(path.exists());

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["commands"][0], "echo hi");
    assert!(raw["last_updated"].is_string());
}

#[tokio::test]
async fn concurrent_appends_in_process_are_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(CommandHistoryStore::new(dir.path().join("h.json")));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move { store.append(&format!("c{i}")).await }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }
    assert_eq!(store.load().await.unwrap().commands.len(), 8);
}
