//! Proxy server
//!
//! Binds the configured addresses, accepts clients and hands each one to a
//! [`Connection`](crate::connection::Connection) built from the server's
//! [`Service`].

mod listener;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::auth::StaticUsers;
use crate::config::{Config, ServerMode};
use crate::connection::{Acceptor, ConnectionManager, Socks5Acceptor, Upstream};
use crate::error::{Result, SocksError};
use crate::proxy::DirectUpstream;
use crate::shadowsocks::{RelayAcceptor, TunnelUpstream};
use crate::util::{create_tcp_listener, install_panic_hook};

/// Default bound on waiting for live connections during close
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(3);

/// How accepted sockets are negotiated and where they are relayed to
#[derive(Clone)]
pub struct Service {
    acceptor: Arc<dyn Acceptor>,
    upstream: Arc<dyn Upstream>,
}

impl Service {
    pub fn new(acceptor: impl Acceptor, upstream: impl Upstream) -> Self {
        Self {
            acceptor: Arc::new(acceptor),
            upstream: Arc::new(upstream),
        }
    }

    /// Build the service selected by `config.server.mode`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let server = &config.server;
        let mut socks = Socks5Acceptor::new()
            .with_idle_timeout(server.idle_timeout())
            .with_write_watermark(server.write_watermark);
        if let Some(users) = StaticUsers::from_config(&config.auth) {
            socks = socks.with_authenticator(users);
        }
        let direct = DirectUpstream::new(server.connect_timeout());

        let service = match server.mode {
            ServerMode::Socks => Service::new(socks, direct),
            ServerMode::Local | ServerMode::Server => {
                let tunnel = config
                    .shadowsocks
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("[shadowsocks] section is required"))?;
                let cipher = tunnel.cipher()?;

                if server.mode == ServerMode::Local {
                    let remote = tunnel
                        .remote_addr
                        .clone()
                        .ok_or_else(|| anyhow::anyhow!("shadowsocks remote_addr is required"))?;
                    let upstream = TunnelUpstream::new(remote, cipher)
                        .with_connect_timeout(server.connect_timeout());
                    Service::new(socks, upstream)
                } else {
                    let relay = RelayAcceptor::new(cipher)
                        .with_idle_timeout(server.idle_timeout())
                        .with_write_watermark(server.write_watermark);
                    Service::new(relay, direct)
                }
            }
        };
        Ok(service)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Closed,
}

struct Listeners {
    state: RunState,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Listening proxy server
pub struct Server {
    bind_addrs: Vec<SocketAddr>,
    service: Service,
    live: Arc<ConnectionManager>,
    /// Every connection task, negotiating or established
    tasks: TaskTracker,
    kill_timeout: Duration,
    listeners: Mutex<Listeners>,
    local_addrs: RwLock<Vec<SocketAddr>>,
}

impl Server {
    pub fn new(bind_addrs: Vec<SocketAddr>, service: Service) -> Self {
        Self {
            bind_addrs,
            service,
            live: ConnectionManager::new(),
            tasks: TaskTracker::new(),
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            listeners: Mutex::new(Listeners {
                state: RunState::Idle,
                shutdown_tx: None,
                tasks: Vec::new(),
            }),
            local_addrs: RwLock::new(Vec::new()),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let service = Service::from_config(config)?;
        Ok(Self::new(config.server.bind_addrs(), service)
            .with_kill_timeout(config.server.kill_timeout()))
    }

    pub fn with_kill_timeout(mut self, kill_timeout: Duration) -> Self {
        self.kill_timeout = kill_timeout;
        self
    }

    /// Bind every address and start accepting. Resolves with the bound
    /// addresses; calling it again while running returns the same list.
    pub async fn start(&self) -> Result<Vec<SocketAddr>> {
        let mut listeners = self.listeners.lock().await;
        match listeners.state {
            RunState::Running => return Ok(self.local_addrs()),
            RunState::Closed => {
                return Err(SocksError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "server is closed",
                )))
            }
            RunState::Idle => {}
        }

        install_panic_hook();

        let mut bound = Vec::with_capacity(self.bind_addrs.len());
        for addr in &self.bind_addrs {
            let listener =
                create_tcp_listener(*addr).map_err(|source| SocksError::Bind { addr: *addr, source })?;
            bound.push(listener);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut local_addrs = Vec::with_capacity(bound.len());
        for socket in bound {
            local_addrs.push(socket.local_addr()?);
            listeners.tasks.push(tokio::spawn(listener::accept_loop(
                socket,
                self.service.clone(),
                self.live.clone(),
                self.tasks.clone(),
                shutdown_rx.clone(),
            )));
        }

        info!(addrs = ?local_addrs, "Server listening");
        *self.local_addrs.write() = local_addrs.clone();
        listeners.shutdown_tx = Some(shutdown_tx);
        listeners.state = RunState::Running;
        Ok(local_addrs)
    }

    /// Addresses actually bound, port 0 resolved
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.local_addrs.read().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.live.len()
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.live
    }

    /// Stop accepting, then close every connection task and wait for them,
    /// bounded by the kill timeout. Connections still negotiating are
    /// waited on too. Repeated calls are harmless.
    pub async fn close(&self) {
        let mut listeners = self.listeners.lock().await;
        let was_running = listeners.state == RunState::Running;
        listeners.state = RunState::Closed;
        if !was_running {
            return;
        }

        info!("Initiating graceful shutdown");
        if let Some(shutdown_tx) = listeners.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        for task in listeners.tasks.drain(..) {
            let _ = task.await;
        }

        let deadline = Instant::now() + self.kill_timeout;
        self.live.signal_shutdown();
        self.live.close_all(self.kill_timeout).await;

        self.tasks.close();
        if tokio::time::timeout_at(deadline, self.tasks.wait()).await.is_err() {
            warn!(tasks = self.tasks.len(), "Kill timeout elapsed with connection tasks running");
        }
        info!("Server shutdown complete");
    }
}
