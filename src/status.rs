//! Connection status tracking with copy-on-write snapshots.
//!
//! The tracker never mutates its map in place: every change clones the
//! current map, applies the change, and publishes the new map as an
//! immutable snapshot over a `tokio::sync::watch` channel. Concurrent
//! readers always see a complete map, and subscribers observe whole-map
//! replacements.
//!
//! Entries exist only for networks currently in the desired set. Absence
//! means "not tracked at all"; `NotConnected` means "tracked, currently
//! disconnected" — the two are semantically different.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::connection::ConnectionEvent;

/// Per-network connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    NotConnected,
    Connecting,
    Connected,
    Error,
}

/// Immutable snapshot of all tracked statuses.
pub type StatusSnapshot = Arc<HashMap<String, ConnectionStatus>>;

/// Authoritative status map, mutated by the orchestrator and by connection
/// event pumps.
pub struct StatusTracker {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(HashMap::new()));
        Self { tx }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    /// Status for one network, `None` if untracked.
    pub fn get(&self, network_id: &str) -> Option<ConnectionStatus> {
        self.tx.borrow().get(network_id).copied()
    }

    /// All tracked network ids.
    pub fn network_ids(&self) -> Vec<String> {
        self.tx.borrow().keys().cloned().collect()
    }

    /// Subscribe to snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    /// Set a network's status, publishing a new snapshot.
    pub(crate) fn set(&self, network_id: &str, status: ConnectionStatus) {
        debug!(network = %network_id, status = ?status, "Status updated");
        self.tx.send_modify(|snapshot| {
            let mut map = (**snapshot).clone();
            map.insert(network_id.to_string(), status);
            *snapshot = Arc::new(map);
        });
    }

    /// Drop a network's entry entirely (the network left the active set).
    pub(crate) fn remove(&self, network_id: &str) {
        self.tx.send_modify(|snapshot| {
            if snapshot.contains_key(network_id) {
                let mut map = (**snapshot).clone();
                map.remove(network_id);
                *snapshot = Arc::new(map);
            }
        });
    }

    /// Apply an asynchronous connection event to a tracked network.
    ///
    /// Untracked ids are ignored — a late event for a removed network must
    /// not resurrect its entry. An `Error` event never downgrades a
    /// currently-`Connected` network: a transient error on an otherwise
    /// healthy connection is not a failure.
    pub(crate) fn apply_event(&self, network_id: &str, event: ConnectionEvent) {
        let current = match self.get(network_id) {
            Some(status) => status,
            None => return,
        };
        let next = match event {
            ConnectionEvent::Connected => ConnectionStatus::Connected,
            ConnectionEvent::Disconnected => ConnectionStatus::NotConnected,
            ConnectionEvent::Reconnecting => ConnectionStatus::Connecting,
            ConnectionEvent::Error => {
                if current == ConnectionStatus::Connected {
                    return;
                }
                ConnectionStatus::Error
            }
        };
        if next != current {
            self.set(network_id, next);
        }
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
