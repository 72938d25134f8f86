use core::error::Error;

/// Errors reading the cluster snapshot.
#[derive(Debug, derive_more::Display)]
pub enum SnapshotError {
    #[display("{resource} cache has not completed its initial sync")]
    NotSynced { resource: &'static str },
    #[display("Failed to list pods on node {node_name}: {message}")]
    PodListFailed { node_name: String, message: String },
}

impl Error for SnapshotError {}

/// Outcome of a rejected eviction request.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum EvictionError {
    /// The API refused the eviction for now, typically a disruption budget.
    #[display("eviction rejected with too many requests")]
    TooManyRequests,
    #[display("pod not found")]
    NotFound,
    #[display("eviction failed: {message}")]
    Other { message: String },
}

impl Error for EvictionError {}
