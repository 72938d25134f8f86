//! Kubernetes API objects to snapshot types.

use std::collections::BTreeMap;

use error_stack::Report;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{
    Container, Node, NodeSelectorRequirement, NodeSelectorTerm as ApiSelectorTerm, Pod,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;

use crate::domain::affinity::{
    NodeSelectorTerm, PlacementRequirements, SelectorOperator, SelectorRequirement,
};
use crate::domain::types::{
    ClusterNode, ConditionStatus, NodeConditions, NodeResources, OwnerRef, PodPhase, PodRequests,
    PodUnit, PodVolume, ReplicaGroup, VolumeKind, MIRROR_POD_ANNOTATION,
};
use crate::infrastructure::k8s::{quantity, KubernetesError};

/// Source of a pod as reported by the kubelet; anything but `api` is static.
pub const CONFIG_SOURCE_ANNOTATION: &str = "kubernetes.io/config.source";
pub const SYSTEM_CRITICAL_PRIORITY: i32 = 2_000_000_000;
const SYSTEM_PRIORITY_CLASSES: [&str; 2] = ["system-cluster-critical", "system-node-critical"];

const CPU: &str = "cpu";
const MEMORY: &str = "memory";
const PODS: &str = "pods";

fn quantity_of(
    resources: Option<&BTreeMap<String, Quantity>>,
    name: &str,
    parse: fn(&Quantity) -> Result<i64, Report<KubernetesError>>,
) -> i64 {
    let Some(q) = resources.and_then(|r| r.get(name)) else {
        return 0;
    };
    parse(q).unwrap_or_else(|e| {
        debug!("Ignoring {name} quantity: {e:?}");
        0
    })
}

fn node_resources(resources: Option<&BTreeMap<String, Quantity>>) -> NodeResources {
    NodeResources {
        cpu_millis: quantity_of(resources, CPU, quantity::cpu_millis),
        memory_bytes: quantity_of(resources, MEMORY, quantity::value),
        pods: quantity_of(resources, PODS, quantity::value),
    }
}

pub fn node_from_api(node: &Node) -> ClusterNode {
    let status = node.status.as_ref();
    let mut conditions = NodeConditions::default();
    for condition in status.and_then(|s| s.conditions.as_ref()).into_iter().flatten() {
        let value = Some(ConditionStatus::parse(&condition.status));
        match condition.type_.as_str() {
            "Ready" => conditions.ready = value,
            "OutOfDisk" => conditions.out_of_disk = value,
            "NetworkUnavailable" => conditions.network_unavailable = value,
            _ => {}
        }
    }

    ClusterNode {
        name: node.metadata.name.clone().unwrap_or_default(),
        labels: node.metadata.labels.clone().unwrap_or_default(),
        conditions,
        unschedulable: node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false),
        capacity: node_resources(status.and_then(|s| s.capacity.as_ref())),
        allocatable: status
            .and_then(|s| s.allocatable.as_ref())
            .map(|a| node_resources(Some(a))),
    }
}

fn container_requests(container: &Container) -> PodRequests {
    let requests = container
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref());
    PodRequests {
        cpu_millis: quantity_of(requests, CPU, quantity::cpu_millis),
        memory_bytes: quantity_of(requests, MEMORY, quantity::value),
    }
}

/// Sum of the app containers or the largest init container, whichever is
/// larger per resource, plus the pod overhead.
fn pod_requests(pod: &Pod) -> PodRequests {
    let Some(spec) = pod.spec.as_ref() else {
        return PodRequests::default();
    };
    let mut total = spec
        .containers
        .iter()
        .map(container_requests)
        .fold(PodRequests::default(), |acc, r| PodRequests {
            cpu_millis: acc.cpu_millis.saturating_add(r.cpu_millis),
            memory_bytes: acc.memory_bytes.saturating_add(r.memory_bytes),
        });
    for init in spec.init_containers.iter().flatten().map(container_requests) {
        total.cpu_millis = total.cpu_millis.max(init.cpu_millis);
        total.memory_bytes = total.memory_bytes.max(init.memory_bytes);
    }
    let overhead = spec.overhead.as_ref();
    total.cpu_millis = total
        .cpu_millis
        .saturating_add(quantity_of(overhead, CPU, quantity::cpu_millis));
    total.memory_bytes = total
        .memory_bytes
        .saturating_add(quantity_of(overhead, MEMORY, quantity::value));
    total
}

fn requirement(req: &NodeSelectorRequirement) -> Option<SelectorRequirement> {
    Some(SelectorRequirement {
        key: req.key.clone(),
        operator: SelectorOperator::parse(&req.operator)?,
        values: req.values.clone().unwrap_or_default(),
    })
}

/// A term with an unknown operator selects nothing.
fn selector_term(term: &ApiSelectorTerm) -> NodeSelectorTerm {
    let convert = |reqs: Option<&Vec<NodeSelectorRequirement>>| {
        reqs.into_iter()
            .flatten()
            .map(requirement)
            .collect::<Option<Vec<_>>>()
    };
    match (
        convert(term.match_expressions.as_ref()),
        convert(term.match_fields.as_ref()),
    ) {
        (Some(match_expressions), Some(match_fields)) => NodeSelectorTerm {
            match_expressions,
            match_fields,
        },
        _ => NodeSelectorTerm::default(),
    }
}

fn placement(pod: &Pod) -> PlacementRequirements {
    let Some(spec) = pod.spec.as_ref() else {
        return PlacementRequirements::default();
    };
    let required_terms = spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|na| na.required_during_scheduling_ignored_during_execution.as_ref())
        .map(|selector| selector.node_selector_terms.iter().map(selector_term).collect())
        .unwrap_or_default();
    PlacementRequirements {
        node_selector: spec.node_selector.clone().unwrap_or_default(),
        required_terms,
    }
}

fn is_critical(pod: &Pod, annotations: &BTreeMap<String, String>) -> bool {
    let is_static = annotations
        .get(CONFIG_SOURCE_ANNOTATION)
        .is_some_and(|source| source != "api");
    let spec = pod.spec.as_ref();
    let high_priority = spec
        .and_then(|s| s.priority)
        .is_some_and(|p| p >= SYSTEM_CRITICAL_PRIORITY);
    let system_class = spec
        .and_then(|s| s.priority_class_name.as_deref())
        .is_some_and(|class| SYSTEM_PRIORITY_CLASSES.contains(&class));
    is_static || annotations.contains_key(MIRROR_POD_ANNOTATION) || high_priority || system_class
}

pub fn pod_from_api(pod: &Pod) -> PodUnit {
    let metadata = &pod.metadata;
    let annotations = metadata.annotations.clone().unwrap_or_default();
    let owners = metadata
        .owner_references
        .iter()
        .flatten()
        .map(|owner| OwnerRef {
            kind: owner.kind.clone(),
            name: owner.name.clone(),
        })
        .collect();
    let volumes = pod
        .spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .into_iter()
        .flatten()
        .map(|volume| PodVolume {
            name: volume.name.clone(),
            kind: if volume.host_path.is_some() {
                VolumeKind::HostPath
            } else if volume.empty_dir.is_some() {
                VolumeKind::EmptyDir
            } else {
                VolumeKind::Other
            },
        })
        .collect();

    PodUnit {
        name: metadata.name.clone().unwrap_or_default(),
        namespace: metadata.namespace.clone().unwrap_or_default(),
        owners,
        requests: pod_requests(pod),
        volumes,
        critical: is_critical(pod, &annotations),
        annotations,
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        phase: PodPhase::parse(pod.status.as_ref().and_then(|s| s.phase.as_deref())),
        placement: placement(pod),
        terminating: metadata.deletion_timestamp.is_some(),
    }
}

pub fn replica_group_from_api(rs: &ReplicaSet) -> ReplicaGroup {
    ReplicaGroup {
        name: rs.metadata.name.clone().unwrap_or_default(),
        namespace: rs.metadata.namespace.clone().unwrap_or_default(),
        desired_replicas: rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
        ready_replicas: rs
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
    }
}
