//! WebSocket API driven end to end against a scripted provider

use cluster_orchestration::testing::{RecordingInstaller, ScriptedCloud};
use cluster_orchestration::{Orchestrator, OrchestratorConfig, RESOURCE_CREATE};
use cluster_state::{FileStore, Status};
use k3sctl::ApiClient;
use k3sctl::daemon;
use k3sctl::protocol::{Request, Response};
use serde_json::json;
use smol::Timer;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Server {
    _dir: TempDir,
    addr: String,
    cloud: ScriptedCloud,
    store: Arc<FileStore>,
}

async fn start_server() -> Server {
    let dir = tempfile::tempdir().unwrap();
    let config = OrchestratorConfig::rooted_at(dir.path());
    let store = Arc::new(FileStore::new(&config.state_dir).await.unwrap());
    let cloud = ScriptedCloud::new();
    let orchestrator = Orchestrator::new(
        config,
        cloud.registry(),
        store.clone(),
        Arc::new(RecordingInstaller::new()),
    );

    let listener = async_net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    smol::spawn(daemon::serve(listener, orchestrator)).detach();

    Server {
        _dir: dir,
        addr,
        cloud,
        store,
    }
}

async fn within<T>(future: impl Future<Output = T>) -> T {
    smol::future::or(future, async {
        Timer::after(Duration::from_secs(10)).await;
        panic!("timed out");
    })
    .await
}

async fn create(client: &mut ApiClient, name: &str) -> String {
    let response = client
        .send_request(Request::CreateCluster {
            cluster: json!({ "name": name, "provider": "scripted", "master": 1, "worker": 1 }),
        })
        .await
        .unwrap();
    match response {
        Response::Accepted { id } => id,
        other => panic!("Expected Accepted, got {other:?}"),
    }
}

async fn wait_for_status(client: &mut ApiClient, id: &str, status: Status) {
    within(async {
        loop {
            let response = client
                .send_request(Request::GetCluster { id: id.to_string() })
                .await
                .unwrap();
            if let Response::Cluster { cluster } = response {
                if cluster.status == status {
                    return;
                }
            }
            Timer::after(Duration::from_millis(20)).await;
        }
    })
    .await
}

#[smol_potat::test]
async fn test_list_starts_empty() {
    let server = start_server().await;
    let mut client = ApiClient::connect(&server.addr).await.unwrap();

    let response = client.send_request(Request::ListClusters).await.unwrap();
    assert_eq!(response, Response::Clusters { clusters: vec![] });
    client.close().await.unwrap();
}

#[smol_potat::test]
async fn test_create_runs_in_background() {
    let server = start_server().await;
    let mut client = ApiClient::connect(&server.addr).await.unwrap();

    let id = create(&mut client, "web").await;
    assert_eq!(id, "web..scripted");
    wait_for_status(&mut client, &id, Status::Running).await;

    let response = client.send_request(Request::ListClusters).await.unwrap();
    let Response::Clusters { clusters } = response else {
        panic!("Expected Clusters, got {response:?}");
    };
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].status, Status::Running);
    assert_eq!(clusters[0].master, 1);
    assert_eq!(clusters[0].worker, 1);
    assert_eq!(server.cloud.count("prepare"), 1);
}

#[smol_potat::test]
async fn test_duplicate_create_is_a_conflict() {
    let server = start_server().await;
    let mut client = ApiClient::connect(&server.addr).await.unwrap();

    let id = create(&mut client, "web").await;
    wait_for_status(&mut client, &id, Status::Running).await;

    let response = client
        .send_request(Request::CreateCluster {
            cluster: json!({ "name": "web", "provider": "scripted" }),
        })
        .await
        .unwrap();
    assert!(matches!(response, Response::Error { ref kind, .. } if kind == "ConflictError"));
}

#[smol_potat::test]
async fn test_delete_removes_cluster() {
    let server = start_server().await;
    let mut client = ApiClient::connect(&server.addr).await.unwrap();

    let id = create(&mut client, "web").await;
    wait_for_status(&mut client, &id, Status::Running).await;

    let response = client
        .send_request(Request::DeleteCluster { id: id.clone() })
        .await
        .unwrap();
    assert_eq!(response, Response::Deleted { id: id.clone() });

    let response = client
        .send_request(Request::GetCluster { id })
        .await
        .unwrap();
    assert!(matches!(response, Response::Error { ref kind, .. } if kind == "NotFound"));
}

#[smol_potat::test]
async fn test_bad_requests_are_reported() {
    let server = start_server().await;
    let mut client = ApiClient::connect(&server.addr).await.unwrap();

    let response = client
        .send_request(Request::CreateCluster {
            cluster: json!({ "name": "web", "provider": "nope" }),
        })
        .await
        .unwrap();
    assert!(matches!(response, Response::Error { ref kind, .. } if kind == "NotFound"));

    let response = client
        .send_request(Request::CreateCluster {
            cluster: json!({ "name": "web", "provider": "scripted", "master": "one" }),
        })
        .await
        .unwrap();
    assert!(matches!(response, Response::Error { ref kind, .. } if kind == "InvalidOption"));

    let response = client
        .send_request(Request::GetCluster {
            id: "missing.scripted".into(),
        })
        .await
        .unwrap();
    assert!(matches!(response, Response::Error { ref kind, .. } if kind == "NotFound"));
}

#[smol_potat::test]
async fn test_watch_pushes_events() {
    let server = start_server().await;
    let mut watcher = ApiClient::connect(&server.addr).await.unwrap();
    let response = watcher.send_request(Request::Watch).await.unwrap();
    assert_eq!(response, Response::Watching);

    let mut client = ApiClient::connect(&server.addr).await.unwrap();
    let id = create(&mut client, "web").await;

    let mut names = Vec::new();
    within(async {
        loop {
            match watcher.next_response().await.unwrap() {
                Response::Event {
                    name,
                    id: event_id,
                    cluster,
                } => {
                    assert_eq!(event_id, id);
                    names.push(name);
                    if cluster.is_some_and(|c| c.status == Status::Running) {
                        return;
                    }
                }
                other => panic!("Expected Event, got {other:?}"),
            }
        }
    })
    .await;

    assert!(names.iter().any(|n| n == RESOURCE_CREATE));
}

#[smol_potat::test]
async fn test_closed_connection_ends_its_watches() {
    let server = start_server().await;
    // the serving orchestrator holds the only other reference
    let idle = Arc::strong_count(&server.store);

    for _ in 0..3 {
        let mut watcher = ApiClient::connect(&server.addr).await.unwrap();
        let response = watcher.send_request(Request::Watch).await.unwrap();
        assert_eq!(response, Response::Watching);
        watcher.close().await.unwrap();
    }

    within(async {
        while Arc::strong_count(&server.store) != idle {
            Timer::after(Duration::from_millis(20)).await;
        }
    })
    .await;
}

#[smol_potat::test]
async fn test_join_adds_nodes_in_background() {
    let server = start_server().await;
    let mut client = ApiClient::connect(&server.addr).await.unwrap();

    let id = create(&mut client, "web").await;
    wait_for_status(&mut client, &id, Status::Running).await;

    let response = client
        .send_request(Request::JoinCluster {
            id: id.clone(),
            cluster: json!({ "worker": 2 }),
        })
        .await
        .unwrap();
    assert_eq!(response, Response::Accepted { id: id.clone() });

    within(async {
        loop {
            let response = client
                .send_request(Request::GetCluster { id: id.clone() })
                .await
                .unwrap();
            if let Response::Cluster { cluster } = response {
                if cluster.status == Status::Running && cluster.worker_nodes.len() == 3 {
                    return;
                }
            }
            Timer::after(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert_eq!(server.cloud.count("prepare_join"), 1);
}

#[smol_potat::test]
async fn test_join_of_unknown_cluster_is_not_found() {
    let server = start_server().await;
    let mut client = ApiClient::connect(&server.addr).await.unwrap();

    let response = client
        .send_request(Request::JoinCluster {
            id: "ghost.scripted".into(),
            cluster: json!({ "worker": 1 }),
        })
        .await
        .unwrap();
    assert!(matches!(response, Response::Error { ref kind, .. } if kind == "NotFound"));
}
