//! Listener orchestration

pub mod client;
pub mod port;

use futures::future::join_all;
use tracing::info;

use crate::config::ListenerConfig;
use crate::sink::SinkHandle;

pub use port::{ListenerSettings, ListenerState, PortListener};

/// Owns every port listener; all of them share one sink
pub struct Server {
    host: String,
    listeners: Vec<PortListener>,
}

impl Server {
    pub fn new(config: &ListenerConfig, sink: SinkHandle) -> Self {
        let settings = ListenerSettings::from(config);
        let listeners = config
            .unique_ports()
            .into_iter()
            .map(|port| PortListener::new(config.host.clone(), port, settings, sink.clone()))
            .collect();

        Self {
            host: config.host.clone(),
            listeners,
        }
    }

    pub fn listeners(&self) -> &[PortListener] {
        &self.listeners
    }

    /// Run every accept loop concurrently. Returns once all of them have
    /// exited, which happens after [`Server::stop`] or when no port could be bound.
    pub async fn start(&self) {
        info!("Starting {} listeners on {}", self.listeners.len(), self.host);
        join_all(self.listeners.iter().map(|listener| listener.serve())).await;
        info!("All listeners stopped");
    }

    /// Wait until every listener has bound or failed; returns how many are serving
    pub async fn wait_started(&self) -> usize {
        let states = join_all(self.listeners.iter().map(|listener| listener.wait_started())).await;
        states
            .into_iter()
            .filter(|s| *s == ListenerState::Serving)
            .count()
    }

    /// Close every listener in turn. Safe to call repeatedly and on listeners
    /// that never bound.
    pub async fn stop(&self) {
        for listener in &self.listeners {
            listener.close().await;
        }
    }
}
