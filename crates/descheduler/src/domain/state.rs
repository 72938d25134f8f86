//! Controller state machine and event routing.

use std::collections::BTreeSet;

use crate::domain::types::Event;

/// State owned by the dispatcher.
///
/// `Recovering` always holds a non-empty set of replica group keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ControllerState {
    #[default]
    Idle,
    Recovering { pending: BTreeSet<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryProgress {
    /// The group is not awaited, or the controller is idle.
    NotTracked,
    /// Groups still awaited.
    Waiting(usize),
    /// The last awaited group recovered and the state is now `Idle`.
    Completed,
}

impl ControllerState {
    /// `Recovering` on `pending`, or `Idle` when there is nothing to wait for.
    pub fn recovering(pending: BTreeSet<String>) -> Self {
        if pending.is_empty() {
            Self::Idle
        } else {
            Self::Recovering { pending }
        }
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self, Self::Recovering { .. })
    }

    pub fn pending(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Idle => None,
            Self::Recovering { pending } => Some(pending),
        }
    }

    pub fn is_pending(&self, group_key: &str) -> bool {
        self.pending().is_some_and(|p| p.contains(group_key))
    }

    /// Removes `group_key` from the pending set, returning to `Idle` once it empties.
    pub fn mark_recovered(&mut self, group_key: &str) -> RecoveryProgress {
        let Self::Recovering { pending } = self else {
            return RecoveryProgress::NotTracked;
        };
        if !pending.remove(group_key) {
            return RecoveryProgress::NotTracked;
        }
        if pending.is_empty() {
            *self = Self::Idle;
            RecoveryProgress::Completed
        } else {
            RecoveryProgress::Waiting(pending.len())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Deschedule,
    Recover,
    Ignore,
}

/// Which handler, if any, processes `event` in `state`.
pub fn route(state: &ControllerState, event: &Event) -> Route {
    match (state, event) {
        (ControllerState::Idle, Event::NodeReady { .. } | Event::TimerFired { .. }) => {
            Route::Deschedule
        }
        (ControllerState::Recovering { .. }, Event::ReplicaGroupUpdate { .. }) => Route::Recover,
        _ => Route::Ignore,
    }
}
