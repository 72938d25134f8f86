//! Watch streams that keep the caches current and feed the work queue.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher::{self, watcher, Event as WatchEvent};
use kube::runtime::{reflector, WatchStreamExt};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::types::{object_key, Event};
use crate::domain::work_queue::WorkQueue;
use crate::infrastructure::k8s::cache::CacheFeed;
use crate::infrastructure::k8s::convert::node_from_api;

/// Turns watch events into work items.
///
/// `initial` is set for the first full list, before the cache reports synced.
pub trait EventTranslator<K>: Send {
    fn observe(&mut self, event: &WatchEvent<K>, initial: bool);
}

/// Only keeps the cache up to date.
pub struct CacheOnly;

impl<K> EventTranslator<K> for CacheOnly {
    fn observe(&mut self, _event: &WatchEvent<K>, _initial: bool) {}
}

/// Pushes `NodeReady` when a node turns operatable and schedulable.
pub struct NodeReadiness {
    queue: WorkQueue,
    ready: HashMap<String, bool>,
}

impl NodeReadiness {
    pub fn new(queue: WorkQueue) -> Self {
        Self {
            queue,
            ready: HashMap::new(),
        }
    }

    fn update(&mut self, node: &Node, notify: bool) {
        let name = node.name_any();
        let ready = node_from_api(node).is_ready();
        let was_ready = self.ready.insert(name.clone(), ready).unwrap_or(false);
        if notify && ready && !was_ready {
            info!("Node {name} became ready");
            self.queue.push(Event::node_ready(name));
        }
    }
}

impl EventTranslator<Node> for NodeReadiness {
    fn observe(&mut self, event: &WatchEvent<Node>, initial: bool) {
        match event {
            WatchEvent::Applied(node) => self.update(node, true),
            WatchEvent::Deleted(node) => {
                self.ready.remove(&node.name_any());
            }
            WatchEvent::Restarted(nodes) => {
                let seen: Vec<String> = nodes.iter().map(ResourceExt::name_any).collect();
                self.ready.retain(|name, _| seen.contains(name));
                for node in nodes {
                    self.update(node, !initial);
                }
            }
        }
    }
}

/// Pushes `ReplicaGroupUpdate` for every replica set change after the initial list.
pub struct ReplicaSetUpdates {
    queue: WorkQueue,
}

impl ReplicaSetUpdates {
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }

    fn push(&self, rs: &ReplicaSet) {
        let key = object_key(&rs.namespace().unwrap_or_default(), &rs.name_any());
        self.queue.push(Event::replica_group_update(key));
    }
}

impl EventTranslator<ReplicaSet> for ReplicaSetUpdates {
    fn observe(&mut self, event: &WatchEvent<ReplicaSet>, initial: bool) {
        match event {
            WatchEvent::Applied(rs) => self.push(rs),
            WatchEvent::Deleted(_) => {}
            WatchEvent::Restarted(all) if !initial => all.iter().for_each(|rs| self.push(rs)),
            WatchEvent::Restarted(_) => {}
        }
    }
}

/// Reflector loop for one resource kind.
pub struct ResourceWatcher<K, T>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    resource: &'static str,
    api: Api<K>,
    config: watcher::Config,
    feed: CacheFeed<K>,
    translator: T,
}

impl<K, T> ResourceWatcher<K, T>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    T: EventTranslator<K>,
{
    pub fn new(
        resource: &'static str,
        api: Api<K>,
        config: watcher::Config,
        feed: CacheFeed<K>,
        translator: T,
    ) -> Self {
        Self {
            resource,
            api,
            config,
            feed,
            translator,
        }
    }

    /// Runs until `token` is cancelled. Watch errors are retried with backoff.
    #[tracing::instrument(skip_all, fields(resource = self.resource))]
    pub async fn run(self, token: CancellationToken) {
        let Self {
            resource,
            api,
            config,
            feed,
            mut translator,
        } = self;
        let CacheFeed { writer, synced } = feed;

        info!("Starting {resource} watcher");
        let mut stream = reflector(writer, watcher(api, config))
            .default_backoff()
            .boxed();
        loop {
            select! {
                _ = token.cancelled() => {
                    info!("{resource} watcher shutdown requested");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        let initial = !*synced.borrow();
                        translator.observe(&event, initial);
                        if initial && matches!(event, WatchEvent::Restarted(_)) {
                            debug!("{resource} initial list applied");
                            synced.send_replace(true);
                        }
                    }
                    Some(Err(e)) => warn!("{resource} watch error, retrying: {e}"),
                    None => {
                        error!("{resource} watch stream ended");
                        break;
                    }
                },
            }
        }
    }
}
