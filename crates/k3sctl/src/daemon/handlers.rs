//! Request handlers for the API server

use crate::protocol::{Request, Response};
use cluster_orchestration::{Error, Orchestrator};
use cluster_state::{ClusterDescriptor, ClusterIdentity};
use serde_json::Value;
use tracing::{error, info};

fn parse_id(id: &str) -> Result<ClusterIdentity, Error> {
    Ok(id.parse::<ClusterIdentity>()?)
}

fn parse_descriptor(cluster: Value) -> Result<ClusterDescriptor, Error> {
    serde_json::from_value(cluster)
        .map_err(|e| Error::InvalidOption(format!("invalid cluster descriptor: {e}")))
}

/// Handle one request. `Watch` is served by the connection itself.
pub async fn handle_request(request: Request, orchestrator: &Orchestrator) -> Response {
    let result = match request {
        Request::ListClusters => orchestrator
            .list()
            .await
            .map(|clusters| Response::Clusters { clusters }),
        Request::GetCluster { id } => get(orchestrator, &id).await,
        Request::DescribeCluster { id } => describe(orchestrator, &id).await,
        Request::CreateCluster { cluster } => create(orchestrator, cluster).await,
        Request::JoinCluster { id, cluster } => join(orchestrator, &id, cluster).await,
        Request::DeleteCluster { id } => delete(orchestrator, &id).await,
        Request::Watch => Err(Error::InvalidOption(
            "Watch needs a WebSocket connection".into(),
        )),
    };
    result.unwrap_or_else(|e| Response::error(&e))
}

async fn get(orchestrator: &Orchestrator, id: &str) -> Result<Response, Error> {
    let state = orchestrator.get(&parse_id(id)?).await?;
    Ok(Response::Cluster {
        cluster: Box::new(state),
    })
}

async fn describe(orchestrator: &Orchestrator, id: &str) -> Result<Response, Error> {
    let cluster = orchestrator.describe(&parse_id(id)?).await?;
    Ok(Response::ClusterInfo { cluster })
}

async fn create(orchestrator: &Orchestrator, cluster: Value) -> Result<Response, Error> {
    let descriptor = parse_descriptor(cluster)?;
    let pending = orchestrator.start_create(descriptor).await?;
    let id = pending.identity().to_string();
    info!("[{}] create accepted", id);

    smol::spawn(async move {
        if let Err(e) = pending.run().await {
            error!("Background create failed: {}", e);
        }
    })
    .detach();

    Ok(Response::Accepted { id })
}

async fn join(orchestrator: &Orchestrator, id: &str, cluster: Value) -> Result<Response, Error> {
    let identity = parse_id(id)?;
    let mut descriptor = parse_descriptor(cluster)?;
    descriptor.name = identity.name;
    descriptor.region = identity.region;
    descriptor.provider = identity.provider;

    let pending = orchestrator.start_join(descriptor).await?;
    let id = pending.identity().to_string();
    info!("[{}] join accepted", id);

    smol::spawn(async move {
        if let Err(e) = pending.run().await {
            error!("Background join failed: {}", e);
        }
    })
    .detach();

    Ok(Response::Accepted { id })
}

async fn delete(orchestrator: &Orchestrator, id: &str) -> Result<Response, Error> {
    let identity = parse_id(id)?;
    orchestrator.delete_by_id(&identity, true).await?;
    Ok(Response::Deleted {
        id: identity.to_string(),
    })
}
