//! Accept loop
//!
//! One task per listening socket. Each accepted socket gets its own
//! connection task plus a supervisor that turns a panic into a regular
//! close. Both are registered with the server's task tracker so close can
//! wait for connections that never got past negotiation.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::Service;
use crate::connection::{Connection, ConnectionHandle, ConnectionManager};
use crate::error::SocksError;
use crate::metrics::METRICS;
use crate::util::configure_stream;

/// Back-off after a failed accept (e.g. descriptor exhaustion)
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

pub(super) async fn accept_loop(
    listener: TcpListener,
    service: Service,
    live: Arc<ConnectionManager>,
    tasks: TaskTracker,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let local_addr = listener.local_addr().ok();
    info!(?local_addr, "Server accepting connections");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = configure_stream(&stream) {
                            debug!(%peer, error = %e, "Failed to tune accepted socket");
                        }
                        let handle = ConnectionHandle::new(peer);
                        spawn_connection(handle, stream, &service, &live, &tasks);
                    }
                    Err(e) => {
                        METRICS.error();
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
            // The watch guard must not outlive this branch
            _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => {
                break;
            }
        }
    }

    info!(?local_addr, "Listener closed");
}

fn spawn_connection(
    handle: ConnectionHandle,
    stream: TcpStream,
    service: &Service,
    live: &Arc<ConnectionManager>,
    tasks: &TaskTracker,
) {
    let connection = Connection::new(
        handle.clone(),
        service.acceptor.clone(),
        service.upstream.clone(),
        live.clone(),
    );
    let task = tasks.spawn(connection.run(stream));

    let live = live.clone();
    tasks.spawn(async move {
        if let Err(e) = task.await {
            if e.is_panic() {
                error!(conn_id = %handle.id(), "Connection task panicked");
                live.remove(&handle);
                handle.finish(&Err(SocksError::TaskPanicked));
            }
        }
    });
}
