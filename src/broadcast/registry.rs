use std::collections::BTreeMap;
use std::sync::Mutex;

use super::connection::{Connection, ConnectionId};
use crate::lock;

/// Attached connections plus the ownership flag for the broadcast loop.
///
/// `loop_active` is claimed by the attach that finds it clear and released by
/// whoever observes the registry empty first (a detach, or the loop itself after
/// pruning). Each claim gets a fresh epoch so a stale release never stops a newer
/// loop.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    connections: BTreeMap<ConnectionId, Connection>,
    loop_active: bool,
    epoch: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Insertion {
    pub added: bool,
    /// Set when this insert claimed the loop; the caller must start it.
    pub start_epoch: Option<u64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: Connection) -> Insertion {
        let mut state = lock(&self.state);
        if state.connections.contains_key(&connection.id()) {
            return Insertion {
                added: false,
                start_epoch: None,
            };
        }
        state.connections.insert(connection.id(), connection);
        let start_epoch = if state.loop_active {
            None
        } else {
            state.loop_active = true;
            state.epoch += 1;
            Some(state.epoch)
        };
        Insertion {
            added: true,
            start_epoch,
        }
    }

    /// Remove one connection; returns it if it was present.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        lock(&self.state).connections.remove(&id)
    }

    pub fn remove_many(&self, ids: &[ConnectionId]) -> Vec<Connection> {
        let mut state = lock(&self.state);
        ids.iter()
            .filter_map(|id| state.connections.remove(id))
            .collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        lock(&self.state).connections.contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        lock(&self.state).connections.get(&id).cloned()
    }

    /// Copy of the current membership; sends happen outside the lock.
    pub fn snapshot(&self) -> Vec<Connection> {
        lock(&self.state).connections.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).connections.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).connections.is_empty()
    }

    /// Epoch of the loop that currently owns streaming, if any.
    pub fn active_epoch(&self) -> Option<u64> {
        let state = lock(&self.state);
        state.loop_active.then_some(state.epoch)
    }

    /// Release the loop if the registry is empty; returns the released epoch.
    pub fn release_if_empty(&self) -> Option<u64> {
        let mut state = lock(&self.state);
        if state.loop_active && state.connections.is_empty() {
            state.loop_active = false;
            Some(state.epoch)
        } else {
            None
        }
    }

    /// Release on behalf of the loop running `epoch`.
    pub fn release_if_empty_for(&self, epoch: u64) -> bool {
        let mut state = lock(&self.state);
        if state.loop_active && state.epoch == epoch && state.connections.is_empty() {
            state.loop_active = false;
            true
        } else {
            false
        }
    }

    /// Remove everyone and release the loop.
    pub fn drain(&self) -> Vec<Connection> {
        let mut state = lock(&self.state);
        state.loop_active = false;
        std::mem::take(&mut state.connections).into_values().collect()
    }
}
