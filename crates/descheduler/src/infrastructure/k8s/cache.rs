//! Reflector-backed snapshot of nodes, pods and replica sets.

use std::time::Duration;

use error_stack::Report;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use tokio::sync::watch;
use tracing::info;

use crate::domain::error::SnapshotError;
use crate::domain::traits::ClusterSnapshot;
use crate::domain::types::{split_key, ClusterNode, PodPhase, PodUnit, ReplicaGroup};
use crate::infrastructure::k8s::convert::{node_from_api, pod_from_api, replica_group_from_api};
use crate::infrastructure::k8s::KubernetesError;

pub const NODE_RESOURCE: &str = "node";
pub const POD_RESOURCE: &str = "pod";
pub const REPLICA_SET_RESOURCE: &str = "replicaSet";

/// Store writer plus the flag raised once its initial list is applied.
pub struct CacheFeed<K>
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Eq + std::hash::Hash + Clone,
{
    pub writer: Writer<K>,
    pub synced: watch::Sender<bool>,
}

fn feed<K>() -> (Store<K>, watch::Receiver<bool>, CacheFeed<K>)
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (store, writer) = reflector::store();
    let (synced, synced_rx) = watch::channel(false);
    (store, synced_rx, CacheFeed { writer, synced })
}

/// Writers handed to the watcher tasks.
pub struct CacheFeeds {
    pub nodes: CacheFeed<Node>,
    pub pods: CacheFeed<Pod>,
    pub replica_sets: CacheFeed<ReplicaSet>,
}

#[derive(Clone)]
pub struct KubeClusterCache {
    nodes: Store<Node>,
    pods: Store<Pod>,
    replica_sets: Store<ReplicaSet>,
    synced: [(&'static str, watch::Receiver<bool>); 3],
}

impl KubeClusterCache {
    pub fn new() -> (Self, CacheFeeds) {
        let (nodes, nodes_synced, nodes_feed) = feed();
        let (pods, pods_synced, pods_feed) = feed();
        let (replica_sets, rs_synced, rs_feed) = feed();
        let cache = Self {
            nodes,
            pods,
            replica_sets,
            synced: [
                (NODE_RESOURCE, nodes_synced),
                (POD_RESOURCE, pods_synced),
                (REPLICA_SET_RESOURCE, rs_synced),
            ],
        };
        let feeds = CacheFeeds {
            nodes: nodes_feed,
            pods: pods_feed,
            replica_sets: rs_feed,
        };
        (cache, feeds)
    }

    fn ensure_synced(&self, resource: &'static str) -> Result<(), Report<SnapshotError>> {
        let synced = self
            .synced
            .iter()
            .find(|(name, _)| *name == resource)
            .is_some_and(|(_, rx)| *rx.borrow());
        if synced {
            Ok(())
        } else {
            Err(Report::new(SnapshotError::NotSynced { resource }))
        }
    }

    /// Blocks until every cache has applied its initial list.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<(), Report<KubernetesError>> {
        let all_synced = async {
            for (resource, rx) in &self.synced {
                let resource = *resource;
                let mut rx = rx.clone();
                if rx.wait_for(|synced| *synced).await.is_err() {
                    return Err(Report::new(KubernetesError::WatchFailed {
                        resource,
                        message: "watcher stopped before the initial sync".to_string(),
                    }));
                }
                info!("{resource} cache synced");
            }
            Ok(())
        };
        tokio::time::timeout(timeout, all_synced)
            .await
            .map_err(|_| {
                Report::new(KubernetesError::CacheSyncTimeout {
                    timeout_secs: timeout.as_secs(),
                })
            })?
    }
}

impl ClusterSnapshot for KubeClusterCache {
    fn list_nodes(&self) -> Result<Vec<ClusterNode>, Report<SnapshotError>> {
        self.ensure_synced(NODE_RESOURCE)?;
        let mut nodes: Vec<ClusterNode> = self
            .nodes
            .state()
            .iter()
            .map(|node| node_from_api(node))
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodUnit>, Report<SnapshotError>> {
        self.ensure_synced(POD_RESOURCE)
            .map_err(|e| {
                e.change_context(SnapshotError::PodListFailed {
                    node_name: node_name.to_string(),
                    message: "pod cache not synced".to_string(),
                })
            })?;
        let mut pods: Vec<PodUnit> = self
            .pods
            .state()
            .iter()
            .filter(|pod| {
                pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node_name)
            })
            .map(|pod| pod_from_api(pod))
            .filter(|pod| pod.phase != PodPhase::Failed)
            .collect();
        pods.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(pods)
    }

    fn get_replica_group_by_key(&self, key: &str) -> Option<ReplicaGroup> {
        let (namespace, name) = split_key(key);
        let mut reference = ObjectRef::<ReplicaSet>::new(name);
        if let Some(namespace) = namespace {
            reference = reference.within(namespace);
        }
        self.replica_sets
            .get(&reference)
            .map(|rs| replica_group_from_api(&rs))
    }
}
