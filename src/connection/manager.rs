//! Live-connection set
//!
//! Established connections keyed by the client's `ip:port`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::handle::ConnectionHandle;

/// Tracks established connections and fans out shutdown
pub struct ConnectionManager {
    live: DashMap<String, ConnectionHandle>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    pub fn new() -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            live: DashMap::new(),
            shutdown_tx,
        })
    }

    /// Add an established connection
    pub fn insert(&self, handle: ConnectionHandle) {
        let key = handle.key().to_owned();
        if let Some(previous) = self.live.insert(key, handle.clone()) {
            warn!(
                key = %handle.key(),
                previous = %previous.id(),
                "Replaced live connection with the same key"
            );
        }
        debug!(conn_id = %handle.id(), live = self.live.len(), "Connection tracked");
    }

    /// Remove `handle` if it is still the entry under its key
    pub fn remove(&self, handle: &ConnectionHandle) -> bool {
        self.live
            .remove_if(handle.key(), |_, current| current.id() == handle.id())
            .is_some()
    }

    pub fn get(&self, key: &str) -> Option<ConnectionHandle> {
        self.live.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.live.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get shutdown receiver
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown to all connection tasks, negotiating ones included
    pub fn signal_shutdown(&self) {
        info!("Signaling shutdown to all connections");
        let _ = self.shutdown_tx.send(());
    }

    /// Close every live connection concurrently, waiting at most `timeout`
    pub async fn close_all(&self, timeout: Duration) {
        let handles: Vec<ConnectionHandle> =
            self.live.iter().map(|entry| entry.value().clone()).collect();
        info!(connections = handles.len(), "Closing live connections");

        let closing = join_all(handles.iter().map(|handle| handle.close()));
        if tokio::time::timeout(timeout, closing).await.is_err() {
            warn!(
                remaining = self.len(),
                "Kill timeout elapsed with connections still open"
            );
        } else {
            info!("All connections closed");
        }
    }
}
