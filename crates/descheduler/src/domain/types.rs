//! Snapshot types the decision engine reads.
//!
//! Everything here is produced by the watch/cache layer and treated as
//! read-only by the controller. Conversions from the Kubernetes API objects
//! live in `infrastructure::k8s::convert`.

use std::collections::BTreeMap;

use crate::domain::affinity::PlacementRequirements;

/// Annotation set by the kubelet on mirror pods of static manifests.
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
/// Owner kind of replica groups tracked for recovery.
pub const REPLICA_SET_KIND: &str = "ReplicaSet";
pub const DAEMON_SET_KIND: &str = "DaemonSet";

/// Status of a node condition as reported by the kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "True" => Self::True,
            "False" => Self::False,
            _ => Self::Unknown,
        }
    }
}

/// The node conditions that decide whether a node is operatable.
///
/// A missing condition never disqualifies a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeConditions {
    pub ready: Option<ConditionStatus>,
    pub out_of_disk: Option<ConditionStatus>,
    pub network_unavailable: Option<ConditionStatus>,
}

/// Node resources in scheduler units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeResources {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
    pub pods: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterNode {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub conditions: NodeConditions,
    /// Explicit cordon flag (`spec.unschedulable`).
    pub unschedulable: bool,
    pub capacity: NodeResources,
    pub allocatable: Option<NodeResources>,
}

impl ClusterNode {
    /// Ready, not out of disk and network available.
    ///
    /// Pods are neither moved off nor onto nodes that fail this check: the
    /// default scheduler already handles not-ready nodes, and the disk and
    /// network conditions would only be delayed by rebalancing.
    pub fn is_operatable(&self) -> bool {
        let c = &self.conditions;
        c.ready.map_or(true, |s| s == ConditionStatus::True)
            && c.out_of_disk.map_or(true, |s| s == ConditionStatus::False)
            && c.network_unavailable
                .map_or(true, |s| s == ConditionStatus::False)
    }

    pub fn is_schedulable(&self) -> bool {
        !self.unschedulable
    }

    /// Operatable and accepting new pods. Transitions into this state raise
    /// `NodeReady` events.
    pub fn is_ready(&self) -> bool {
        self.is_operatable() && self.is_schedulable()
    }

    pub fn allocatable(&self) -> NodeResources {
        self.allocatable.unwrap_or(self.capacity)
    }
}

/// Reference to the controller owning a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    HostPath,
    EmptyDir,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodVolume {
    pub name: String,
    pub kind: VolumeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Effective resource requests of a pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodRequests {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodUnit {
    pub name: String,
    pub namespace: String,
    pub owners: Vec<OwnerRef>,
    pub requests: PodRequests,
    pub volumes: Vec<PodVolume>,
    pub annotations: BTreeMap<String, String>,
    pub critical: bool,
    pub node_name: Option<String>,
    pub phase: PodPhase,
    pub placement: PlacementRequirements,
    /// Deletion already requested.
    pub terminating: bool,
}

impl PodUnit {
    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }

    /// Key of the owning replica group, if the pod belongs to one.
    pub fn replica_group_key(&self) -> Option<String> {
        self.owners
            .iter()
            .find(|owner| owner.kind == REPLICA_SET_KIND)
            .map(|owner| object_key(&self.namespace, &owner.name))
    }

    pub fn is_mirror(&self) -> bool {
        self.annotations.contains_key(MIRROR_POD_ANNOTATION)
    }

    pub fn has_local_storage(&self) -> bool {
        self.volumes
            .iter()
            .any(|v| matches!(v.kind, VolumeKind::HostPath | VolumeKind::EmptyDir))
    }

    pub fn is_daemon_set_pod(&self) -> bool {
        self.owners.iter().any(|owner| owner.kind == DAEMON_SET_KIND)
    }
}

/// A controller keeping N copies of a pod running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaGroup {
    pub name: String,
    pub namespace: String,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
}

impl ReplicaGroup {
    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }
}

/// `namespace/name`, or just `name` for cluster-scoped objects.
pub fn object_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

/// Splits a key produced by [`object_key`].
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((namespace, name)) => (Some(namespace), name),
        None => (None, key),
    }
}

/// Kind of the resource an event was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ResourceKind {
    #[display("node")]
    Node,
    #[display("replicaSet")]
    ReplicaSet,
    #[display("timer")]
    Timer,
}

/// Work item consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    /// A node became operatable and schedulable.
    NodeReady { key: String },
    /// Status of a replica group changed.
    ReplicaGroupUpdate { key: String },
    /// Time window opened, periodic tick, or post-recovery re-trigger.
    TimerFired { key: String },
}

impl Event {
    pub fn node_ready(name: impl Into<String>) -> Self {
        Self::NodeReady { key: name.into() }
    }

    pub fn replica_group_update(key: impl Into<String>) -> Self {
        Self::ReplicaGroupUpdate { key: key.into() }
    }

    pub fn timer(source: impl Into<String>) -> Self {
        Self::TimerFired { key: source.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::NodeReady { key }
            | Self::ReplicaGroupUpdate { key }
            | Self::TimerFired { key } => key,
        }
    }

    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Self::NodeReady { .. } => ResourceKind::Node,
            Self::ReplicaGroupUpdate { .. } => ResourceKind::ReplicaSet,
            Self::TimerFired { .. } => ResourceKind::Timer,
        }
    }
}
