mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{prose, write_file, TestEnv};
use notegate::app::Services;
use notegate::config::StoreBackend;
use notegate::models::EventKind;
use notegate::watcher::{spawn_watcher, ChannelSource, FsEvent, WatchControl, WatcherHandle, WatcherStatus};

async fn wait_for(control: &WatchControl, pred: impl Fn(&WatcherStatus) -> bool) -> WatcherStatus {
    let mut rx = control.subscribe();
    let status = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for watcher")
        .expect("watcher stopped")
        .clone();
    status
}

fn start(
    env: &mut TestEnv,
    services: &Services,
    debounce_ms: u64,
    startup_scan: bool,
) -> (WatcherHandle, tokio::sync::mpsc::Sender<FsEvent>) {
    env.config.watcher.debounce_ms = debounce_ms;
    let (source, tx) = ChannelSource::new();
    let handle = spawn_watcher(
        services.indexer.clone(),
        Box::new(source),
        &env.config.watcher,
        startup_scan,
    )
    .unwrap();
    (handle, tx)
}

#[tokio::test]
async fn rapid_modifications_coalesce_into_one_pass() {
    let mut env = TestEnv::new(StoreBackend::Memory);
    let services = env.services().await;
    let root = services.indexer.root().to_path_buf();
    let (watcher, tx) = start(&mut env, &services, 200, false);
    let control = watcher.control();

    let file = write_file(&root, "journal/a.md", &prose("first draft", 1500));
    for i in 0..6 {
        write_file(&root, "journal/a.md", &prose(&format!("draft {i}"), 1500));
        tx.send(FsEvent {
            path: file.clone(),
            kind: EventKind::Modified,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    wait_for(&control, |s| s.passes_completed >= 1).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let status = control.status();
    assert_eq!(status.passes_completed, 1);
    assert_eq!(status.pending, 0);
    assert_eq!(env.embedder.calls(), 1);
    assert_eq!(services.registry.get("journal/a.md").unwrap().chunk_count, 2);

    watcher.shutdown().await;
}

#[tokio::test]
async fn relative_event_paths_are_accepted() {
    let mut env = TestEnv::new(StoreBackend::Memory);
    let services = env.services().await;
    let root = services.indexer.root().to_path_buf();
    let (watcher, tx) = start(&mut env, &services, 50, false);

    write_file(&root, "b.txt", "plain text note");
    tx.send(FsEvent {
        path: "./b.txt".into(),
        kind: EventKind::Created,
    })
    .await
    .unwrap();

    wait_for(&watcher.control(), |s| s.passes_completed >= 1).await;
    assert!(services.registry.contains("b.txt"));
    watcher.shutdown().await;
}

#[tokio::test]
async fn delete_event_removes_chunks_and_entry() {
    let mut env = TestEnv::new(StoreBackend::Memory);
    let services = env.services().await;
    let root = services.indexer.root().to_path_buf();

    let file = write_file(&root, "a.md", &prose("ephemeral", 2500));
    services.indexer.process("a.md").await.unwrap();
    assert_eq!(services.store.count_for_path("a.md").await.unwrap(), 3);

    let (watcher, tx) = start(&mut env, &services, 50, false);
    std::fs::remove_file(&file).unwrap();
    tx.send(FsEvent {
        path: file,
        kind: EventKind::Deleted,
    })
    .await
    .unwrap();

    wait_for(&watcher.control(), |s| s.passes_completed >= 1).await;
    assert!(services.registry.get("a.md").is_none());
    assert_eq!(services.store.count_for_path("a.md").await.unwrap(), 0);
    watcher.shutdown().await;
}

#[tokio::test]
async fn directory_moved_out_of_root_is_dropped() {
    let mut env = TestEnv::new(StoreBackend::Memory);
    let services = env.services().await;
    let root = services.indexer.root().to_path_buf();

    write_file(&root, "sub/a.md", "first note");
    write_file(&root, "sub/b.md", "second note");
    write_file(&root, "other.md", "stays");
    services.indexer.sync_all().await.unwrap();

    let (watcher, tx) = start(&mut env, &services, 50, false);
    std::fs::rename(root.join("sub"), env.tmp.path().join("sub-archived")).unwrap();
    tx.send(FsEvent {
        path: root.join("sub"),
        kind: EventKind::Deleted,
    })
    .await
    .unwrap();

    wait_for(&watcher.control(), |s| s.passes_completed >= 1).await;
    assert_eq!(services.registry.paths(), vec!["other.md".to_string()]);
    assert_eq!(services.store.count_for_path("sub/a.md").await.unwrap(), 0);
    assert_eq!(services.store.count_for_path("sub/b.md").await.unwrap(), 0);
    watcher.shutdown().await;
}

#[tokio::test]
async fn startup_scan_indexes_new_files_and_drops_orphans() {
    let mut env = TestEnv::new(StoreBackend::Sqlite);
    let services = env.services().await;
    let root = services.indexer.root().to_path_buf();

    write_file(&root, "old.md", "indexed before the restart");
    services.indexer.process("old.md").await.unwrap();
    std::fs::remove_file(root.join("old.md")).unwrap();
    write_file(&root, "journal/new.md", "written while down");
    write_file(&root, "code/lib.rs", "fn main() {}");

    let (watcher, _tx) = start(&mut env, &services, 50, true);
    wait_for(&watcher.control(), |s| s.passes_completed >= 3).await;

    assert_eq!(
        services.registry.paths(),
        vec!["code/lib.rs".to_string(), "journal/new.md".to_string()]
    );
    assert_eq!(services.store.count_for_path("old.md").await.unwrap(), 0);
    watcher.shutdown().await;
}

#[tokio::test]
async fn ignored_paths_never_reach_the_embedder() {
    let mut env = TestEnv::new(StoreBackend::Memory);
    let services = env.services().await;
    let root = services.indexer.root().to_path_buf();
    services.policy.add_ignore("scratch/*", None).unwrap();

    let (watcher, tx) = start(&mut env, &services, 50, false);
    let file = write_file(&root, "scratch/temp.md", "do not index");
    tx.send(FsEvent {
        path: file,
        kind: EventKind::Created,
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(env.embedder.calls(), 0);
    assert!(services.registry.is_empty());
    assert!(root.join("scratch/temp.md").exists());
    watcher.shutdown().await;
}

#[tokio::test]
async fn excluded_paths_are_not_queued() {
    let mut env = TestEnv::new(StoreBackend::Memory);
    let services = env.services().await;
    let root = services.indexer.root().to_path_buf();
    let (watcher, tx) = start(&mut env, &services, 5_000, false);

    let file = write_file(&root, ".git/notes.md", "internal");
    tx.send(FsEvent {
        path: file,
        kind: EventKind::Modified,
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(watcher.control().status().pending, 0);
    watcher.shutdown().await;
}

#[tokio::test]
async fn embedding_outage_is_counted_and_recovered() {
    let mut env = TestEnv::new(StoreBackend::Memory);
    let services = env.services().await;
    let root = services.indexer.root().to_path_buf();
    let (watcher, tx) = start(&mut env, &services, 50, false);
    let control = watcher.control();

    env.embedder.set_down(true);
    let file = write_file(&root, "a.md", "needs embedding");
    tx.send(FsEvent {
        path: file.clone(),
        kind: EventKind::Modified,
    })
    .await
    .unwrap();

    let status = wait_for(&control, |s| s.failures >= 1).await;
    assert!(status.running);
    assert!(status.last_error.unwrap().contains("embedding service unavailable"));
    assert!(services.registry.is_empty());

    env.embedder.set_down(false);
    tx.send(FsEvent {
        path: file,
        kind: EventKind::Modified,
    })
    .await
    .unwrap();
    wait_for(&control, |s| s.passes_completed >= 1).await;
    assert!(services.registry.contains("a.md"));
    watcher.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_pending_timers() {
    let mut env = TestEnv::new(StoreBackend::Memory);
    let services = env.services().await;
    let root = services.indexer.root().to_path_buf();
    let (watcher, tx) = start(&mut env, &services, 10_000, false);
    let control = watcher.control();

    let file = write_file(&root, "a.md", "pending forever");
    tx.send(FsEvent {
        path: file,
        kind: EventKind::Created,
    })
    .await
    .unwrap();
    wait_for(&control, |s| s.pending == 1).await;

    tokio::time::timeout(Duration::from_secs(2), watcher.shutdown())
        .await
        .expect("shutdown should not wait for the debounce window");

    let status = control.status();
    assert!(!status.running);
    assert_eq!(status.passes_completed, 0);
    assert_eq!(env.embedder.calls(), 0);
}

#[tokio::test]
async fn reindexing_unchanged_file_is_idempotent() {
    let env = TestEnv::new(StoreBackend::Sqlite);
    let services = env.services().await;
    let root = services.indexer.root().to_path_buf();
    write_file(&root, "a.md", &prose("stable", 3000));

    services.indexer.process("a.md").await.unwrap();
    let first = services.store.ids_for_path("a.md").await.unwrap();
    services.indexer.process("a.md").await.unwrap();
    let second = services.store.ids_for_path("a.md").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.len(), 4);
    assert_eq!(services.registry.get("a.md").unwrap().chunk_count, 4);
}

#[tokio::test]
async fn state_survives_restart() {
    let env = TestEnv::new(StoreBackend::Sqlite);
    {
        let services = env.services().await;
        let root = services.indexer.root().to_path_buf();
        write_file(&root, "a.md", "persisted");
        services.policy.set_gate("journal", "readonly").unwrap();
        services.indexer.sync_all().await.unwrap();
    }

    let services = Arc::new(env.services().await);
    assert!(services.registry.contains("a.md"));
    assert_eq!(services.store.count_for_path("a.md").await.unwrap(), 1);
    assert_eq!(services.policy.gate_count(), 1);
    assert!(services.indexer.reconcile().await.unwrap().is_empty());
}
