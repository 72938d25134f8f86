//! Node scoring and classification.
//!
//! Every operatable node gets three scores computed from its CPU, memory and
//! pod-count usage, and lands in exactly one of three buckets:
//!
//! - **usage**: at least one resource is above its usage ceiling
//!   (`100 - min_spared`); these are the nodes to relieve.
//! - **spared**: nothing is running low, something has more headroom than
//!   `max_spared`, and the node accepts new pods.
//! - **normal**: everything else.

use std::cmp::Ordering;

use tracing::{debug, info, warn};

use crate::domain::traits::ClusterSnapshot;
use crate::domain::types::{ClusterNode, PodUnit};

/// A percentage per resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourcePercentages {
    pub cpu: f64,
    pub memory: f64,
    pub pods: f64,
}

impl ResourcePercentages {
    pub const fn uniform(value: f64) -> Self {
        Self {
            cpu: value,
            memory: value,
            pods: value,
        }
    }

    fn pairs(&self, other: &Self) -> [(f64, f64); 3] {
        [
            (self.cpu, other.cpu),
            (self.memory, other.memory),
            (self.pods, other.pods),
        ]
    }
}

/// Headroom thresholds per resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparedThresholds {
    /// Less headroom than this marks the resource as running low.
    pub min_spared: ResourcePercentages,
    /// More headroom than this marks the resource as highly spared.
    pub max_spared: ResourcePercentages,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeScore {
    pub usage: f64,
    pub spared: f64,
    pub normal: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Bucket {
    #[display("high usage")]
    Usage,
    #[display("high spared")]
    Spared,
    #[display("normal")]
    Normal,
}

/// Nodes of each bucket, highest score first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Buckets {
    pub usage: Vec<ClusterNode>,
    pub spared: Vec<ClusterNode>,
    pub normal: Vec<ClusterNode>,
}

fn percentage(used: i64, available: i64) -> f64 {
    if available <= 0 {
        return if used > 0 { 100.0 } else { 0.0 };
    }
    used as f64 * 100.0 / available as f64
}

/// Requested share of the node's allocatable resources.
pub fn node_usage(node: &ClusterNode, pods: &[PodUnit]) -> ResourcePercentages {
    let allocatable = node.allocatable();
    let (cpu, memory) = pods.iter().fold((0i64, 0i64), |(cpu, memory), pod| {
        (
            cpu.saturating_add(pod.requests.cpu_millis),
            memory.saturating_add(pod.requests.memory_bytes),
        )
    });
    ResourcePercentages {
        cpu: percentage(cpu, allocatable.cpu_millis),
        memory: percentage(memory, allocatable.memory_bytes),
        pods: percentage(pods.len() as i64, allocatable.pods),
    }
}

pub fn score(usage: &ResourcePercentages, thresholds: &SparedThresholds) -> NodeScore {
    let ceilings = ResourcePercentages {
        cpu: 100.0 - thresholds.min_spared.cpu,
        memory: 100.0 - thresholds.min_spared.memory,
        pods: 100.0 - thresholds.min_spared.pods,
    };
    let ceiling_pairs = usage.pairs(&ceilings);
    let floor_pairs = usage.pairs(&thresholds.max_spared);

    let mut result = NodeScore::default();
    for ((used, ceiling), (_, floor)) in ceiling_pairs.into_iter().zip(floor_pairs) {
        let spared = 100.0 - used;
        if used > ceiling {
            result.usage += used * used / 100.0;
        } else if spared > floor {
            result.spared += spared * spared / 100.0;
        }
        result.normal += used * used / 100.0;
    }
    result
}

pub fn bucket_for(score: &NodeScore, schedulable: bool) -> Bucket {
    if score.usage > 0.0 {
        Bucket::Usage
    } else if score.spared > 0.0 && schedulable {
        Bucket::Spared
    } else {
        Bucket::Normal
    }
}

fn by_score_desc(a: &(ClusterNode, f64), b: &(ClusterNode, f64)) -> Ordering {
    b.1.total_cmp(&a.1)
}

#[derive(Debug, Clone)]
pub struct NodeClassifier {
    thresholds: SparedThresholds,
}

impl NodeClassifier {
    pub fn new(thresholds: SparedThresholds) -> Self {
        Self { thresholds }
    }

    /// Score and rank nodes whose usage is already known.
    pub fn bucketize(
        &self,
        measured: impl IntoIterator<Item = (ClusterNode, ResourcePercentages)>,
    ) -> Buckets {
        let mut usage = Vec::new();
        let mut spared = Vec::new();
        let mut normal = Vec::new();

        for (node, percentages) in measured {
            let node_score = score(&percentages, &self.thresholds);
            let bucket = bucket_for(&node_score, node.is_schedulable());
            debug!(
                node = %node.name,
                cpu = percentages.cpu,
                memory = percentages.memory,
                pods = percentages.pods,
                "Node {} is marked as a {} node",
                node.name,
                bucket
            );
            match bucket {
                Bucket::Usage => usage.push((node, node_score.usage)),
                Bucket::Spared => spared.push((node, node_score.spared)),
                Bucket::Normal => normal.push((node, node_score.normal)),
            }
        }

        for ranked in [&mut usage, &mut spared, &mut normal] {
            ranked.sort_by(by_score_desc);
        }
        let strip = |ranked: Vec<(ClusterNode, f64)>| ranked.into_iter().map(|(n, _)| n).collect();
        Buckets {
            usage: strip(usage),
            spared: strip(spared),
            normal: strip(normal),
        }
    }

    /// Measure every operatable node and bucket it.
    ///
    /// Fails closed: a single unreadable pod list yields `None`.
    pub fn measure(
        &self,
        snapshot: &dyn ClusterSnapshot,
        nodes: &[ClusterNode],
    ) -> Option<Buckets> {
        let mut measured = Vec::with_capacity(nodes.len());
        for node in nodes.iter().filter(|n| n.is_operatable()) {
            match snapshot.list_pods_on_node(&node.name) {
                Ok(pods) => measured.push((node.clone(), node_usage(node, &pods))),
                Err(e) => {
                    warn!("Deschedule event aborted, failed to get usage of node {}: {e:?}", node.name);
                    return None;
                }
            }
        }
        Some(self.bucketize(measured))
    }

    /// Nodes to relieve, most loaded first, or `None` when nothing should be
    /// descheduled.
    pub fn classify(
        &self,
        snapshot: &dyn ClusterSnapshot,
        nodes: &[ClusterNode],
    ) -> Option<Vec<ClusterNode>> {
        let buckets = self.measure(snapshot, nodes)?;
        Self::decide(buckets)
    }

    pub fn decide(buckets: Buckets) -> Option<Vec<ClusterNode>> {
        if !buckets.usage.is_empty() {
            info!(
                "{} node(s) running low on resources, spared nodes: {}",
                buckets.usage.len(),
                buckets.spared.len()
            );
            return Some(buckets.usage);
        }
        if !buckets.normal.is_empty() {
            info!("All nodes reserved sufficient resource. Try deschedule anyway.");
            return Some(buckets.normal);
        }
        info!("Deschedule event aborted, all nodes are spared, nothing to deschedule");
        None
    }
}
