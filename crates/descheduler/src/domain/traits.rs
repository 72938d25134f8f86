//! Seams between the decision engine and the cluster it acts on

use async_trait::async_trait;
use chrono::NaiveDateTime;
use error_stack::Report;

use crate::domain::error::{EvictionError, SnapshotError};
use crate::domain::types::{ClusterNode, PodUnit, ReplicaGroup};

/// Read-only view of the watched cluster state.
pub trait ClusterSnapshot: Send + Sync {
    /// All nodes matched by the node selector.
    fn list_nodes(&self) -> Result<Vec<ClusterNode>, Report<SnapshotError>>;

    /// Pods assigned to `node_name`, excluding failed pods.
    fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodUnit>, Report<SnapshotError>>;

    /// Look up a replica group by its `namespace/name` key
    fn get_replica_group_by_key(&self, key: &str) -> Option<ReplicaGroup>;
}

/// Issues eviction requests to the orchestration API.
#[async_trait]
pub trait PodEvictor: Send + Sync {
    async fn evict_pod(&self, pod: &PodUnit) -> Result<(), EvictionError>;
}

/// Wall-clock source for the time window.
pub trait Clock: Send + Sync {
    /// Local date and time.
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}
