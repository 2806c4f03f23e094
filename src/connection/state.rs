//! Connection state

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::protocol::Destination;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate the next process-wide id
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Handshake, auth and connect request in progress
    Negotiating,
    /// Destination agreed, bytes are relayed
    Established,
    /// Torn down
    Closed,
}

/// Per-connection bookkeeping
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub client_addr: SocketAddr,
    pub phase: ConnectionPhase,
    pub destination: Option<Destination>,
    pub connected_at: Instant,
    pub last_active: Instant,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
}

impl ConnectionState {
    pub fn new(client_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            client_addr,
            phase: ConnectionPhase::Negotiating,
            destination: None,
            connected_at: now,
            last_active: now,
            bytes_rx: 0,
            bytes_tx: 0,
        }
    }

    pub fn set_established(&mut self, destination: Destination) {
        self.phase = ConnectionPhase::Established;
        self.destination = Some(destination);
        self.touch();
    }

    pub fn set_closed(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn record_rx(&mut self, bytes: u64) {
        self.bytes_rx = self.bytes_rx.saturating_add(bytes);
        self.touch();
    }

    pub fn record_tx(&mut self, bytes: u64) {
        self.bytes_tx = self.bytes_tx.saturating_add(bytes);
        self.touch();
    }

    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// True once a destination was agreed, also after close
    pub fn was_established(&self) -> bool {
        self.destination.is_some()
    }
}
