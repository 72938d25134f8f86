//! Kubernetes integration.
//!
//! - [`KubeClusterCache`]: reflector stores serving the cluster snapshot
//! - [`ResourceWatcher`]: watch loops feeding the stores and the work queue
//! - [`KubePodEvictor`]: eviction subresource client

pub mod cache;
pub mod convert;
pub mod evictor;
pub mod quantity;
pub mod types;
pub mod watchers;

pub use cache::{CacheFeeds, KubeClusterCache};
pub use evictor::{discover_eviction_api_version, KubePodEvictor};
pub use types::KubernetesError;
pub use watchers::{CacheOnly, NodeReadiness, ReplicaSetUpdates, ResourceWatcher};
