//! File store behaviour under concurrency and the directory watcher

use cluster_state::{
    ClusterDescriptor, ClusterState, Error, FileStore, StateEvent, StateStore, StateWatcher,
    Status,
};
use futures::future::join_all;
use std::time::Duration;
use tempfile::tempdir;

fn creating(name: &str, marker: u32) -> ClusterState {
    let mut d = ClusterDescriptor::new(name, "demo");
    d.master = marker;
    ClusterState::new(d, Status::Creating)
}

#[smol_potat::test]
async fn test_concurrent_creates_admit_exactly_one() {
    let dir = tempdir().unwrap();
    let store = FileStore::new(dir.path()).await.unwrap();

    let attempts = (1..=8).map(|i| {
        let store = store.clone();
        smol::spawn(async move { store.create(&creating("dev", i)).await })
    });
    let results = join_all(attempts).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(Error::Conflict(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);

    // the stored record is the winner's, untouched by the losers
    let stored = store.list().await.unwrap();
    assert_eq!(stored.len(), 1);
    let winner = results.iter().position(|r| r.is_ok()).unwrap() as u32 + 1;
    assert_eq!(stored[0].descriptor.master, winner);
}

#[smol_potat::test]
async fn test_different_identities_do_not_contend() {
    let dir = tempdir().unwrap();
    let store = FileStore::new(dir.path()).await.unwrap();

    let writes = (0..6).map(|i| {
        let store = store.clone();
        smol::spawn(async move { store.create(&creating(&format!("c{i}"), 1)).await })
    });
    for result in join_all(writes).await {
        result.unwrap();
    }
    assert_eq!(store.list().await.unwrap().len(), 6);
}

#[smol_potat::test]
async fn test_store_reopens_existing_directory() {
    let dir = tempdir().unwrap();
    {
        let store = FileStore::new(dir.path()).await.unwrap();
        let mut state = creating("dev", 1);
        store.create(&state).await.unwrap();
        state.set_status(Status::Failed);
        store.save(&state).await.unwrap();
    }

    let store = FileStore::new(dir.path()).await.unwrap();
    let found = store.find("dev", "demo").await.unwrap();
    assert_eq!(found.status, Status::Failed);
}

async fn next_event(watcher: &StateWatcher) -> Option<StateEvent> {
    smol::future::or(watcher.recv(), async {
        smol::Timer::after(Duration::from_secs(5)).await;
        None
    })
    .await
}

#[smol_potat::test]
async fn test_watcher_reports_record_lifecycle() {
    let dir = tempdir().unwrap();
    let store = FileStore::new(dir.path()).await.unwrap();
    let watcher = StateWatcher::new(dir.path()).unwrap();

    let mut state = creating("dev", 1);
    store.create(&state).await.unwrap();
    state.set_status(Status::Running);
    store.save(&state).await.unwrap();
    store.delete(&state.identity, false).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = next_event(&watcher).await {
        let done = matches!(event, StateEvent::Removed { .. });
        events.push(event);
        if done {
            break;
        }
    }

    assert!(matches!(
        events.first(),
        Some(StateEvent::Created { status: Status::Creating, .. })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        StateEvent::Changed { status: Status::Running, .. }
    )));
    assert!(matches!(events.last(), Some(StateEvent::Removed { .. })));
}
