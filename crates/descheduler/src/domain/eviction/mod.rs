//! Pod eviction: what may be evicted, what should be, and issuing the requests.

pub mod evictable;
pub mod executor;
pub mod policy;

pub use evictable::{check_evictable, Unevictable};
pub use executor::{EvictionExecutor, EvictionOutcome, EvictionReport};
pub use policy::{EvictionPolicy, EvictionReason, PinnedPeerPolicy, PolicyOptions, Selected};
