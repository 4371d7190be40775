//! Port listener: one bound socket and its accept loop

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, debug_span, info, warn, Instrument};

use super::client::ConnectionHandler;
use crate::config::{ListenerConfig, ShutdownMode};
use crate::sink::SinkHandle;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum BindError {
    #[error("permission denied binding {addr}: {source}")]
    PermissionDenied { addr: String, source: io::Error },
    #[error("address {addr} already in use: {source}")]
    AddrInUse { addr: String, source: io::Error },
    #[error("cannot bind {addr}: {source}")]
    Other { addr: String, source: io::Error },
}

impl BindError {
    fn new(addr: String, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied { addr, source },
            io::ErrorKind::AddrInUse => BindError::AddrInUse { addr, source },
            _ => BindError::Other { addr, source },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Serving,
    Closed,
}

/// Per-listener settings shared by every port
#[derive(Debug, Clone, Copy)]
pub struct ListenerSettings {
    pub read_size: usize,
    pub delay: Option<Duration>,
    pub shutdown: ShutdownMode,
}

impl From<&ListenerConfig> for ListenerSettings {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            read_size: config.read_size,
            delay: config.delay(),
            shutdown: config.shutdown,
        }
    }
}

pub struct PortListener {
    host: String,
    port: u16,
    settings: ListenerSettings,
    sink: SinkHandle,
    state: watch::Sender<ListenerState>,
    shutdown: CancellationToken,
    connections: TaskTracker,
}

/// Marks the listener closed when dropped
struct ClosedOnDrop<'a>(&'a watch::Sender<ListenerState>);

impl Drop for ClosedOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ListenerState::Closed);
    }
}

impl PortListener {
    pub fn new(host: String, port: u16, settings: ListenerSettings, sink: SinkHandle) -> Self {
        let (state, _) = watch::channel(ListenerState::Unbound);
        debug!(
            "Port listener {}:{} created (read_size={}, delay={:?}, shutdown={:?})",
            host, port, settings.read_size, settings.delay, settings.shutdown
        );

        Self {
            host,
            port,
            settings,
            sink,
            state,
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Number of connection handlers still running
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Wait until the listener has either started serving or given up
    pub async fn wait_started(&self) -> ListenerState {
        let mut state = self.state.subscribe();
        let started = match state.wait_for(|s| *s != ListenerState::Unbound).await {
            Ok(s) => *s,
            Err(_) => self.state(),
        };
        started
    }

    fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    async fn bind(&self) -> Result<TcpListener, BindError> {
        let addr = self.addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|e| BindError::new(addr, e))
    }

    /// Bind and accept until closed. A failed bind is logged and returns
    /// immediately; it never affects other listeners.
    pub async fn serve(&self) {
        if self.state() != ListenerState::Unbound {
            debug!("Listener on port {} already started or closed", self.port);
            return;
        }

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Cannot start listener on port {}: {} - skipping", self.port, e);
                self.state.send_if_modified(mark_closed_if_unbound);
                return;
            }
        };

        let started = self.state.send_if_modified(|s| {
            if *s == ListenerState::Unbound {
                *s = ListenerState::Serving;
                true
            } else {
                false
            }
        });
        if !started {
            debug!("Listener on port {} closed before it started serving", self.port);
            return;
        }

        let _closed = ClosedOnDrop(&self.state);
        info!("Listening on {}", self.addr());
        self.accept_loop(listener).await;
    }

    /// Owns the socket so it is released before the state flips to closed
    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => self.spawn_handler(socket, peer_addr),
                    Err(e) => {
                        warn!("Accept error on port {}: {}", self.port, e);
                        if !self.backoff_after_accept_error().await {
                            break;
                        }
                    }
                },
            }
        }

        debug!("Accept loop on port {} stopped", self.port);
    }

    /// Pause before the next accept so errors like EMFILE don't spin the loop.
    /// Returns false if the listener was closed while waiting.
    async fn backoff_after_accept_error(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
        }
    }

    fn spawn_handler(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let handler = ConnectionHandler::new(
            peer_addr,
            &self.host,
            self.port,
            self.settings.read_size,
            self.settings.delay,
            self.sink.clone(),
        );
        debug!("New client {} on port {}", handler.client_id(), self.port);

        let span = debug_span!("client", port = self.port, client = %handler.client_id());
        self.connections.spawn(handler.handle(socket).instrument(span));
    }

    /// Stop accepting and wait for the socket to close. Safe to call more than
    /// once and on a listener that never bound. Open connections are only
    /// waited for in [`ShutdownMode::Drain`].
    pub async fn close(&self) {
        self.shutdown.cancel();

        if self.state.send_if_modified(mark_closed_if_unbound) {
            debug!("Listener on port {} was never bound", self.port);
            return;
        }

        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ListenerState::Closed).await;
        info!("Closed listener on {}", self.addr());

        if self.settings.shutdown == ShutdownMode::Drain {
            self.connections.close();
            let open = self.active_connections();
            if open > 0 {
                info!("Waiting for {} open connections on port {}", open, self.port);
            }
            self.connections.wait().await;
            debug!("All connections on port {} finished", self.port);
        }
    }
}

fn mark_closed_if_unbound(state: &mut ListenerState) -> bool {
    if *state == ListenerState::Unbound {
        *state = ListenerState::Closed;
        true
    } else {
        false
    }
}
