use crate::domain::types::PodUnit;

/// Why a pod must stay where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Unevictable {
    #[display("mirror pod")]
    Mirror,
    #[display("uses local storage")]
    LocalStorage,
    #[display("has no controller")]
    NoController,
    #[display("owned by a DaemonSet")]
    DaemonSet,
    #[display("critical pod")]
    Critical,
    #[display("already terminating")]
    Terminating,
    #[display("outside working namespaces")]
    OutsideWorkingNamespaces,
}

/// Checks whether `pod` may be evicted at all.
///
/// An empty `working_namespaces` list admits every namespace.
pub fn check_evictable(pod: &PodUnit, working_namespaces: &[String]) -> Result<(), Unevictable> {
    if !working_namespaces.is_empty() && !working_namespaces.contains(&pod.namespace) {
        return Err(Unevictable::OutsideWorkingNamespaces);
    }
    if pod.is_mirror() {
        return Err(Unevictable::Mirror);
    }
    if pod.critical {
        return Err(Unevictable::Critical);
    }
    if pod.has_local_storage() {
        return Err(Unevictable::LocalStorage);
    }
    if pod.owners.is_empty() {
        return Err(Unevictable::NoController);
    }
    if pod.is_daemon_set_pod() {
        return Err(Unevictable::DaemonSet);
    }
    if pod.terminating {
        return Err(Unevictable::Terminating);
    }
    Ok(())
}
