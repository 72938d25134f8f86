//! Test adapters implementing the domain traits
//!
//! In-memory cluster snapshot, scripted evictor and builders shared by the
//! unit tests of the decision engine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use error_stack::Report;

use super::affinity::PlacementRequirements;
use super::error::{EvictionError, SnapshotError};
use super::traits::{ClusterSnapshot, PodEvictor};
use super::types::{
    ClusterNode, NodeConditions, NodeResources, OwnerRef, PodPhase, PodRequests, PodUnit,
    PodVolume, ReplicaGroup, VolumeKind,
};

pub fn node(name: &str, cpu_millis: i64, memory_bytes: i64, pods: i64) -> ClusterNode {
    let resources = NodeResources {
        cpu_millis,
        memory_bytes,
        pods,
    };
    ClusterNode {
        name: name.to_string(),
        labels: BTreeMap::new(),
        conditions: NodeConditions::default(),
        unschedulable: false,
        capacity: resources,
        allocatable: Some(resources),
    }
}

pub fn pod(name: &str, namespace: &str, node: &str, cpu_millis: i64, memory_bytes: i64) -> PodUnit {
    PodUnit {
        name: name.to_string(),
        namespace: namespace.to_string(),
        owners: Vec::new(),
        requests: PodRequests {
            cpu_millis,
            memory_bytes,
        },
        volumes: Vec::new(),
        annotations: BTreeMap::new(),
        critical: false,
        node_name: Some(node.to_string()),
        phase: PodPhase::Running,
        placement: PlacementRequirements::default(),
        terminating: false,
    }
}

pub fn group(namespace: &str, name: &str, desired: i32, ready: i32) -> ReplicaGroup {
    ReplicaGroup {
        name: name.to_string(),
        namespace: namespace.to_string(),
        desired_replicas: desired,
        ready_replicas: ready,
    }
}

impl ClusterNode {
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn cordoned(mut self) -> Self {
        self.unschedulable = true;
        self
    }
}

impl PodUnit {
    pub fn owned_by(mut self, kind: &str, name: &str) -> Self {
        self.owners.push(OwnerRef {
            kind: kind.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn in_group(self, name: &str) -> Self {
        self.owned_by(super::types::REPLICA_SET_KIND, name)
    }

    pub fn with_volume(mut self, kind: VolumeKind) -> Self {
        self.volumes.push(PodVolume {
            name: format!("vol-{}", self.volumes.len()),
            kind,
        });
        self
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_placement(mut self, placement: PlacementRequirements) -> Self {
        self.placement = placement;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Cluster state held in memory.
#[derive(Default)]
pub struct InMemoryCluster {
    nodes: Mutex<Vec<ClusterNode>>,
    pods: Mutex<Vec<PodUnit>>,
    groups: Mutex<HashMap<String, ReplicaGroup>>,
    failing_nodes: Mutex<HashSet<String>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(self, node: ClusterNode) -> Self {
        self.nodes.lock().unwrap().push(node);
        self
    }

    pub fn with_pod(self, pod: PodUnit) -> Self {
        self.pods.lock().unwrap().push(pod);
        self
    }

    pub fn with_group(self, group: ReplicaGroup) -> Self {
        self.set_group(group);
        self
    }

    /// Pod listing for `node_name` fails.
    pub fn with_failing_node(self, node_name: &str) -> Self {
        self.failing_nodes
            .lock()
            .unwrap()
            .insert(node_name.to_string());
        self
    }

    pub fn set_group(&self, group: ReplicaGroup) {
        self.groups.lock().unwrap().insert(group.key(), group);
    }
}

impl ClusterSnapshot for InMemoryCluster {
    fn list_nodes(&self) -> Result<Vec<ClusterNode>, Report<SnapshotError>> {
        Ok(self.nodes.lock().unwrap().clone())
    }

    fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodUnit>, Report<SnapshotError>> {
        if self.failing_nodes.lock().unwrap().contains(node_name) {
            return Err(Report::new(SnapshotError::PodListFailed {
                node_name: node_name.to_string(),
                message: "injected failure".to_string(),
            }));
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.node_name.as_deref() == Some(node_name) && p.phase != PodPhase::Failed)
            .cloned()
            .collect())
    }

    fn get_replica_group_by_key(&self, key: &str) -> Option<ReplicaGroup> {
        self.groups.lock().unwrap().get(key).cloned()
    }
}

/// Evictor that records calls and answers from a script.
#[derive(Default)]
pub struct RecordingEvictor {
    responses: Mutex<HashMap<String, EvictionError>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingEvictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eviction of `pod_key` fails with `error`.
    pub fn failing(self, pod_key: &str, error: EvictionError) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(pod_key.to_string(), error);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PodEvictor for RecordingEvictor {
    async fn evict_pod(&self, pod: &PodUnit) -> Result<(), EvictionError> {
        let key = pod.key();
        self.calls.lock().unwrap().push(key.clone());
        match self.responses.lock().unwrap().get(&key) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Node `a` at 95% CPU with two co-located pods each of `web` and `api`,
/// node `b` nearly empty.
pub fn busy_cluster() -> InMemoryCluster {
    InMemoryCluster::new()
        .with_node(node("a", 1000, 8 << 30, 110))
        .with_node(node("b", 1000, 8 << 30, 110))
        .with_group(group("default", "web", 3, 3))
        .with_group(group("default", "api", 2, 2))
        .with_pod(pod("web-0", "default", "a", 300, 0).in_group("web"))
        .with_pod(pod("web-1", "default", "a", 300, 0).in_group("web"))
        .with_pod(pod("api-0", "default", "a", 200, 0).in_group("api"))
        .with_pod(pod("api-1", "default", "a", 150, 0).in_group("api"))
        .with_pod(pod("web-2", "default", "b", 100, 0).in_group("web"))
}
