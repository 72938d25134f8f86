//! Selection of the pods to evict in one descheduling cycle.
//!
//! Ranked source nodes are visited most loaded first. On each node the
//! evictable pods go through three stages, each one only seeing what the
//! previous stage left behind:
//!
//! 1. *unfit affinity*: the pod's required placement rejects its current
//!    node but accepts another operatable, schedulable node.
//! 2. *peer on one node*: two or more pods of one replica group share the
//!    node; the first one seen is pinned and the rest are selected.
//! 3. *peer elsewhere*: the pod's replica group keeps another ready replica
//!    after every pod selected so far this cycle is gone.

use std::collections::HashMap;

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::evictable::check_evictable;
use crate::domain::error::SnapshotError;
use crate::domain::traits::ClusterSnapshot;
use crate::domain::types::{ClusterNode, PodUnit};

/// What happens to the pinned pod of a co-located replica group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinnedPeerPolicy {
    /// The pinned pod stays on its node for the rest of the cycle.
    #[default]
    Exclude,
    /// The pinned pod is still offered to the peer-elsewhere stage.
    Include,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyOptions {
    /// Enables the peer-on-one-node stage.
    pub prevent_co_location: bool,
    /// Lets the peer-elsewhere stage take a group's last ready replica.
    pub hard_eviction: bool,
    pub pinned_peer: PinnedPeerPolicy,
    /// Empty means every namespace.
    pub working_namespaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum EvictionReason {
    #[display("unfit affinity")]
    UnfitAffinity,
    #[display("co-located peer")]
    CoLocatedPeer,
    #[display("peer elsewhere")]
    PeerElsewhere,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selected {
    pub pod: PodUnit,
    pub reason: EvictionReason,
}

/// Running selection of one cycle.
#[derive(Default)]
struct Selection {
    selected: Vec<Selected>,
    per_group: HashMap<String, i32>,
}

impl Selection {
    fn push(&mut self, pod: PodUnit, reason: EvictionReason) {
        debug!(pod = %pod.key(), %reason, "Pod selected for eviction");
        if let Some(key) = pod.replica_group_key() {
            *self.per_group.entry(key).or_default() += 1;
        }
        self.selected.push(Selected { pod, reason });
    }

    fn taken_from(&self, group_key: &str) -> i32 {
        self.per_group.get(group_key).copied().unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.selected.len()
    }
}

#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    options: PolicyOptions,
}

impl EvictionPolicy {
    pub fn new(options: PolicyOptions) -> Self {
        Self { options }
    }

    /// Picks at most `max_evict` pods from `ranked` nodes, in rank order.
    ///
    /// A node whose pods cannot be listed is skipped; failing to list the
    /// relocation targets aborts the selection.
    pub fn select_evictions(
        &self,
        snapshot: &dyn ClusterSnapshot,
        ranked: &[ClusterNode],
        max_evict: usize,
    ) -> Result<Vec<Selected>, Report<SnapshotError>> {
        let targets: Vec<ClusterNode> = snapshot
            .list_nodes()
            .attach_printable("Failed to list relocation targets")?
            .into_iter()
            .filter(ClusterNode::is_ready)
            .collect();

        let mut selection = Selection::default();
        for node in ranked {
            if selection.len() >= max_evict {
                break;
            }
            let pods = match snapshot.list_pods_on_node(&node.name) {
                Ok(pods) => pods,
                Err(e) => {
                    warn!("Skipping node {}, failed to list its pods: {e:?}", node.name);
                    continue;
                }
            };
            self.select_on_node(snapshot, node, pods, &targets, &mut selection);
        }

        let mut selected = selection.selected;
        selected.truncate(max_evict);
        info!("Selected {} pod(s) for eviction", selected.len());
        Ok(selected)
    }

    fn select_on_node(
        &self,
        snapshot: &dyn ClusterSnapshot,
        node: &ClusterNode,
        pods: Vec<PodUnit>,
        targets: &[ClusterNode],
        selection: &mut Selection,
    ) {
        let evictable = pods.into_iter().filter(|pod| {
            match check_evictable(pod, &self.options.working_namespaces) {
                Ok(()) => true,
                Err(reason) => {
                    debug!(pod = %pod.key(), "Pod is not evictable: {reason}");
                    false
                }
            }
        });

        let mut remaining = Vec::new();
        for pod in evictable {
            if is_misplaced(&pod, node, targets) {
                selection.push(pod, EvictionReason::UnfitAffinity);
            } else {
                remaining.push(pod);
            }
        }

        let remaining = if self.options.prevent_co_location {
            self.split_co_located(remaining, selection)
        } else {
            remaining
        };

        for pod in remaining {
            let Some(key) = pod.replica_group_key() else {
                continue;
            };
            let Some(group) = snapshot.get_replica_group_by_key(&key) else {
                debug!(pod = %pod.key(), "Replica group {key} is not cached");
                continue;
            };
            let left = group.ready_replicas - selection.taken_from(&key);
            if self.options.hard_eviction || left > 1 {
                selection.push(pod, EvictionReason::PeerElsewhere);
            }
        }
    }

    /// Selects all but the first pod of each replica group sharing the node
    /// and returns the pods left for the peer-elsewhere stage.
    fn split_co_located(&self, pods: Vec<PodUnit>, selection: &mut Selection) -> Vec<PodUnit> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for key in pods.iter().filter_map(PodUnit::replica_group_key) {
            *counts.entry(key).or_default() += 1;
        }

        let mut pinned: HashMap<String, bool> = HashMap::new();
        let mut remaining = Vec::new();
        for pod in pods {
            let Some(key) = pod.replica_group_key() else {
                remaining.push(pod);
                continue;
            };
            if counts.get(&key).copied().unwrap_or_default() < 2 {
                remaining.push(pod);
                continue;
            }
            if pinned.insert(key, true).is_some() {
                selection.push(pod, EvictionReason::CoLocatedPeer);
                continue;
            }
            match self.options.pinned_peer {
                PinnedPeerPolicy::Exclude => {
                    debug!(pod = %pod.key(), "Pinned co-located pod kept for this cycle")
                }
                PinnedPeerPolicy::Include => remaining.push(pod),
            }
        }
        remaining
    }
}

/// Required placement rejects `current` but some other target accepts it.
fn is_misplaced(pod: &PodUnit, current: &ClusterNode, targets: &[ClusterNode]) -> bool {
    pod.placement.is_constrained()
        && !pod.placement.fits(current)
        && targets
            .iter()
            .any(|target| target.name != current.name && pod.placement.fits(target))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::domain::affinity::PlacementRequirements;
    use crate::domain::mock::{group, node, pod, InMemoryCluster};

    const GIB: i64 = 1 << 30;

    fn options() -> PolicyOptions {
        PolicyOptions {
            prevent_co_location: true,
            ..PolicyOptions::default()
        }
    }

    fn keys(selected: &[Selected]) -> Vec<String> {
        selected.iter().map(|s| s.pod.key()).collect()
    }

    fn zone_bound(zone: &str) -> PlacementRequirements {
        PlacementRequirements {
            node_selector: BTreeMap::from([("zone".to_string(), zone.to_string())]),
            required_terms: Vec::new(),
        }
    }

    fn web(name: &str, node_name: &str) -> PodUnit {
        pod(name, "default", node_name, 100, 0).in_group("web")
    }

    fn cluster_with(nodes: &[&str]) -> InMemoryCluster {
        nodes
            .iter()
            .fold(InMemoryCluster::new(), |c, n| c.with_node(node(n, 4000, 8 * GIB, 110)))
    }

    #[test]
    fn co_located_replicas_keep_first_seen() {
        let cluster = cluster_with(&["a", "b"])
            .with_group(group("default", "web", 3, 3))
            .with_pod(web("web-0", "a"))
            .with_pod(web("web-1", "a"))
            .with_pod(web("web-2", "a"));
        let policy = EvictionPolicy::new(options());
        let ranked = vec![node("a", 4000, 8 * GIB, 110)];

        let selected = policy.select_evictions(&cluster, &ranked, 2).expect("selection");
        assert_eq!(keys(&selected), vec!["default/web-1", "default/web-2"]);
        assert!(selected
            .iter()
            .all(|s| s.reason == EvictionReason::CoLocatedPeer));
    }

    #[test]
    fn unfit_pod_is_not_counted_twice() {
        let cluster = InMemoryCluster::new()
            .with_node(node("a", 4000, 8 * GIB, 110).with_label("zone", "east"))
            .with_node(node("b", 4000, 8 * GIB, 110).with_label("zone", "west"))
            .with_group(group("default", "web", 3, 3))
            .with_pod(web("web-0", "a").with_placement(zone_bound("west")))
            .with_pod(web("web-1", "a"))
            .with_pod(web("web-2", "a"));
        let policy = EvictionPolicy::new(options());
        let ranked = cluster.list_nodes().expect("nodes");

        let selected = policy.select_evictions(&cluster, &ranked[..1], 2).expect("selection");
        assert_eq!(
            selected
                .iter()
                .map(|s| (s.pod.name.as_str(), s.reason))
                .collect::<Vec<_>>(),
            vec![
                ("web-0", EvictionReason::UnfitAffinity),
                ("web-2", EvictionReason::CoLocatedPeer),
            ]
        );
    }

    #[test]
    fn unfit_pod_without_target_stays() {
        let cluster = InMemoryCluster::new()
            .with_node(node("a", 4000, 8 * GIB, 110).with_label("zone", "east"))
            .with_node(node("b", 4000, 8 * GIB, 110).with_label("zone", "west").cordoned())
            .with_group(group("default", "web", 1, 1))
            .with_pod(web("web-0", "a").with_placement(zone_bound("west")));
        let policy = EvictionPolicy::new(options());
        let ranked = cluster.list_nodes().expect("nodes");

        let selected = policy.select_evictions(&cluster, &ranked[..1], 5).expect("selection");
        assert!(selected.is_empty());
    }

    #[test]
    fn sole_ready_replica_is_protected() {
        let cluster = cluster_with(&["a", "b"])
            .with_group(group("default", "solo", 1, 1))
            .with_group(group("default", "pair", 2, 2))
            .with_pod(pod("solo-0", "default", "a", 100, 0).in_group("solo"))
            .with_pod(pod("pair-0", "default", "a", 100, 0).in_group("pair"))
            .with_pod(pod("pair-1", "default", "b", 100, 0).in_group("pair"));
        let policy = EvictionPolicy::new(options());
        let ranked = cluster.list_nodes().expect("nodes");

        let selected = policy.select_evictions(&cluster, &ranked, 10).expect("selection");
        // pair-1 is protected once pair-0 is gone
        assert_eq!(keys(&selected), vec!["default/pair-0"]);
        assert_eq!(selected[0].reason, EvictionReason::PeerElsewhere);
    }

    #[test]
    fn hard_eviction_takes_last_replica() {
        let cluster = cluster_with(&["a"])
            .with_group(group("default", "solo", 1, 1))
            .with_pod(pod("solo-0", "default", "a", 100, 0).in_group("solo"));
        let policy = EvictionPolicy::new(PolicyOptions {
            hard_eviction: true,
            ..options()
        });
        let ranked = cluster.list_nodes().expect("nodes");

        let selected = policy.select_evictions(&cluster, &ranked, 10).expect("selection");
        assert_eq!(keys(&selected), vec!["default/solo-0"]);
    }

    #[test]
    fn not_ready_group_is_protected() {
        let cluster = cluster_with(&["a", "b"])
            .with_group(group("default", "web", 3, 1))
            .with_pod(web("web-0", "a"))
            .with_pod(web("web-1", "b"));
        let policy = EvictionPolicy::new(options());
        let ranked = cluster.list_nodes().expect("nodes");

        assert!(policy
            .select_evictions(&cluster, &ranked, 10)
            .expect("selection")
            .is_empty());
    }

    #[test]
    fn pinned_peer_excluded_by_default() {
        let cluster = cluster_with(&["a", "b"])
            .with_group(group("default", "web", 4, 4))
            .with_pod(web("web-0", "a"))
            .with_pod(web("web-1", "a"))
            .with_pod(web("web-2", "b"))
            .with_pod(web("web-3", "b"));
        let ranked = vec![node("a", 4000, 8 * GIB, 110)];

        let excluded = EvictionPolicy::new(options())
            .select_evictions(&cluster, &ranked, 10)
            .expect("selection");
        assert_eq!(keys(&excluded), vec!["default/web-1"]);

        let included = EvictionPolicy::new(PolicyOptions {
            pinned_peer: PinnedPeerPolicy::Include,
            ..options()
        })
        .select_evictions(&cluster, &ranked, 10)
        .expect("selection");
        assert_eq!(
            included
                .iter()
                .map(|s| (s.pod.name.as_str(), s.reason))
                .collect::<Vec<_>>(),
            vec![
                ("web-1", EvictionReason::CoLocatedPeer),
                ("web-0", EvictionReason::PeerElsewhere),
            ]
        );
    }

    #[test]
    fn co_location_stage_can_be_disabled() {
        let cluster = cluster_with(&["a"])
            .with_group(group("default", "web", 2, 2))
            .with_pod(web("web-0", "a"))
            .with_pod(web("web-1", "a"));
        let policy = EvictionPolicy::new(PolicyOptions::default());
        let ranked = cluster.list_nodes().expect("nodes");

        let selected = policy.select_evictions(&cluster, &ranked, 10).expect("selection");
        assert_eq!(
            selected.iter().map(|s| s.reason).collect::<Vec<_>>(),
            vec![EvictionReason::PeerElsewhere]
        );
    }

    #[test]
    fn cap_is_filled_in_rank_order() {
        let mut cluster = cluster_with(&["a", "b", "c"]);
        for (node_name, group_name) in [("a", "x"), ("b", "y"), ("c", "z")] {
            cluster = cluster.with_group(group("default", group_name, 10, 10));
            for i in 0..3 {
                cluster = cluster.with_pod(
                    pod(&format!("{group_name}-{i}"), "default", node_name, 100, 0)
                        .in_group(group_name),
                );
            }
        }
        let policy = EvictionPolicy::new(options());
        let ranked = vec![
            node("c", 4000, 8 * GIB, 110),
            node("a", 4000, 8 * GIB, 110),
            node("b", 4000, 8 * GIB, 110),
        ];

        let selected = policy.select_evictions(&cluster, &ranked, 3).expect("selection");
        assert_eq!(
            keys(&selected),
            vec!["default/z-1", "default/z-2", "default/x-1"]
        );
    }

    #[test]
    fn unreadable_node_is_skipped() {
        let cluster = cluster_with(&["a", "b"])
            .with_failing_node("a")
            .with_group(group("default", "web", 3, 3))
            .with_pod(web("web-0", "b"))
            .with_pod(web("web-1", "b"));
        let policy = EvictionPolicy::new(options());
        let ranked = cluster.list_nodes().expect("nodes");

        let selected = policy.select_evictions(&cluster, &ranked, 10).expect("selection");
        assert_eq!(keys(&selected), vec!["default/web-1"]);
    }

    #[test]
    fn unevictable_pods_are_never_selected() {
        let cluster = cluster_with(&["a"])
            .with_group(group("default", "web", 5, 5))
            .with_pod(web("web-0", "a").critical())
            .with_pod(pod("bare", "default", "a", 100, 0));
        let policy = EvictionPolicy::new(options());
        let ranked = cluster.list_nodes().expect("nodes");

        assert!(policy
            .select_evictions(&cluster, &ranked, 10)
            .expect("selection")
            .is_empty());
    }
}
