//! Shared view of one connection
//!
//! A [`ConnectionHandle`] is held by the connection task, the live set and
//! any observer. Teardown bookkeeping runs exactly once through
//! [`ConnectionHandle::finish`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::state::{ConnectionId, ConnectionPhase, ConnectionState};
use crate::error::{ErrorKind, SocksError};
use crate::metrics::METRICS;
use crate::protocol::Destination;

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Established(Destination),
    /// Failure of an established connection
    Error {
        kind: ErrorKind,
        code: &'static str,
        message: String,
    },
    Closed,
}

struct Shared {
    id: ConnectionId,
    key: String,
    state: Mutex<ConnectionState>,
    phase_tx: watch::Sender<ConnectionPhase>,
    close_tx: watch::Sender<bool>,
    events: broadcast::Sender<ConnectionEvent>,
    finished: AtomicBool,
}

#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub fn new(peer: SocketAddr) -> Self {
        let id = ConnectionId::next();
        let (phase_tx, _) = watch::channel(ConnectionPhase::Negotiating);
        let (close_tx, _) = watch::channel(false);
        let (events, _) = broadcast::channel(8);

        METRICS.connection_opened();
        info!(conn_id = %id, %peer, "Client connected");

        Self {
            shared: Arc::new(Shared {
                id,
                key: peer.to_string(),
                state: Mutex::new(ConnectionState::new(peer)),
                phase_tx,
                close_tx,
                events,
                finished: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Live-set key, `ip:port` of the client
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn peer(&self) -> SocketAddr {
        self.shared.state.lock().client_addr
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.shared.phase_tx.borrow()
    }

    pub fn is_established(&self) -> bool {
        self.shared.state.lock().was_established()
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == ConnectionPhase::Closed
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub(crate) fn close_requested(&self) -> watch::Receiver<bool> {
        self.shared.close_tx.subscribe()
    }

    pub(crate) fn established(&self, destination: &Destination) {
        let peer = {
            let mut state = self.shared.state.lock();
            state.set_established(destination.clone());
            state.client_addr
        };
        self.shared.phase_tx.send_replace(ConnectionPhase::Established);
        METRICS.connection_established();
        info!(conn_id = %self.id(), %peer, %destination, "Connection established");
        let _ = self
            .shared
            .events
            .send(ConnectionEvent::Established(destination.clone()));
    }

    /// Add relayed byte totals; global counters are kept by the relay itself
    pub(crate) fn record_traffic(&self, rx: u64, tx: u64) {
        let mut state = self.shared.state.lock();
        state.record_rx(rx);
        state.record_tx(tx);
    }

    /// Ask the connection task to stop without waiting
    pub fn request_close(&self) {
        self.shared.close_tx.send_replace(true);
    }

    /// Close the connection and wait for teardown. Repeated calls are
    /// harmless and produce a single `Closed` event.
    pub async fn close(&self) {
        self.request_close();
        self.closed().await;
    }

    /// Wait until teardown finished
    pub async fn closed(&self) {
        let mut phase = self.shared.phase_tx.subscribe();
        let _ = phase.wait_for(|p| *p == ConnectionPhase::Closed).await;
    }

    /// Record the outcome and release. Returns `false` if already finished.
    pub(crate) fn finish(&self, result: &Result<(), SocksError>) -> bool {
        if self.shared.finished.swap(true, Ordering::AcqRel) {
            return false;
        }

        let state = {
            let mut state = self.shared.state.lock();
            state.set_closed();
            state.clone()
        };
        let id = self.id();

        if let Err(e) = result {
            if e.is_connection_reset() {
                debug!(conn_id = %id, error = %e, "Connection reset by peer");
            } else {
                warn!(
                    conn_id = %id,
                    peer = %state.client_addr,
                    code = e.code(),
                    error = %e,
                    "Connection failed"
                );
            }
            METRICS.error();
            METRICS.connection_failed();
            if e.kind() == ErrorKind::Timeout {
                METRICS.timeout();
            }
            if state.was_established() {
                let _ = self.shared.events.send(ConnectionEvent::Error {
                    kind: e.kind(),
                    code: e.code(),
                    message: e.to_string(),
                });
            }
        }

        METRICS.connection_closed();
        info!(
            conn_id = %id,
            client_addr = %state.client_addr,
            duration_secs = state.duration().as_secs_f64(),
            bytes_rx = state.bytes_rx,
            bytes_tx = state.bytes_tx,
            "Client disconnected"
        );

        self.shared.phase_tx.send_replace(ConnectionPhase::Closed);
        let _ = self.shared.events.send(ConnectionEvent::Closed);
        true
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id())
            .field("key", &self.key())
            .field("phase", &self.phase())
            .finish()
    }
}
