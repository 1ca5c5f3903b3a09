//! Protocol types for the WebSocket API
//!
//! Every message is a JSON text frame tagged with `type`.

use cluster_orchestration::{ClusterEvent, Error};
use cluster_state::{ClusterInfo, ClusterState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// List clusters, reconciled with their providers
    ListClusters,

    /// Stored record of one cluster
    GetCluster { id: String },

    /// Live view of one cluster
    DescribeCluster { id: String },

    /// Create a cluster from a descriptor; returns once the record exists
    CreateCluster { cluster: Value },

    /// Add nodes to the cluster `id`
    JoinCluster { id: String, cluster: Value },

    /// Delete a cluster without confirmation
    DeleteCluster { id: String },

    /// Stream cluster events on this connection
    Watch,
}

/// Response messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Result of `ListClusters`
    Clusters { clusters: Vec<ClusterInfo> },

    /// Result of `GetCluster`
    Cluster { cluster: Box<ClusterState> },

    /// Result of `DescribeCluster`
    ClusterInfo { cluster: ClusterInfo },

    /// Workflow started in the background
    Accepted { id: String },

    /// Cluster deleted, or already gone
    Deleted { id: String },

    /// Events follow on this connection
    Watching,

    /// Cluster event pushed to a watching connection
    Event {
        name: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cluster: Option<ClusterInfo>,
    },

    /// Request failed
    Error { kind: String, message: String },
}

impl Response {
    /// Error response carrying the kind of `err`
    pub fn error(err: &Error) -> Self {
        Response::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<ClusterEvent> for Response {
    fn from(event: ClusterEvent) -> Self {
        Response::Event {
            name: event.name,
            id: event.id,
            cluster: event.cluster,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request: Request =
            serde_json::from_value(json!({"type": "DeleteCluster", "id": "dev..demo"})).unwrap();
        assert_eq!(
            request,
            Request::DeleteCluster {
                id: "dev..demo".into()
            }
        );

        let watch = serde_json::to_value(Request::Watch).unwrap();
        assert_eq!(watch, json!({"type": "Watch"}));
    }

    #[test]
    fn test_error_response_carries_kind() {
        let response = Response::error(&Error::Conflict("dev..demo".into()));
        assert_eq!(
            serde_json::to_value(response).unwrap(),
            json!({"type": "Error", "kind": "ConflictError", "message": "Conflict: dev..demo"})
        );
    }
}
