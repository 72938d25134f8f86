use core::error::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to watch {resource}: {message}")]
    WatchFailed {
        resource: &'static str,
        message: String,
    },
    #[display("Timed out after {timeout_secs}s waiting for caches to sync")]
    CacheSyncTimeout { timeout_secs: u64 },
    #[display("Failed to discover API group {group}: {message}")]
    DiscoveryFailed { group: String, message: String },
    #[display("Invalid quantity {value:?}")]
    InvalidQuantity { value: String },
}

impl Error for KubernetesError {}
