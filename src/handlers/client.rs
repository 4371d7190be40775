//! Per-connection read/acknowledge loop

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

use crate::record::Record;
use crate::sink::SinkHandle;

/// Handles one accepted connection until the peer leaves or I/O fails
pub struct ConnectionHandler {
    client_id: String,
    host: String,
    port: u16,
    read_size: usize,
    delay: Option<Duration>,
    sink: SinkHandle,
}

impl ConnectionHandler {
    pub fn new(
        peer_addr: SocketAddr,
        host: &str,
        port: u16,
        read_size: usize,
        delay: Option<Duration>,
        sink: SinkHandle,
    ) -> Self {
        // IPv4 peers on a dual-stack socket are reported in their plain form
        let client_id = format!("{}:{}", peer_addr.ip().to_canonical(), peer_addr.port());

        Self {
            client_id,
            host: host.to_string(),
            port,
            read_size,
            delay,
            sink,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Record every read and answer it with an empty write.
    /// The connection is dropped on EOF or on the first I/O error.
    pub async fn handle<S>(self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buf = vec![0u8; self.read_size];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("Client {} disconnected from port {}", self.client_id, self.port);
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!("Read error from {} on port {}: {}", self.client_id, self.port, e);
                    return;
                }
            };

            debug!("Received {} bytes from {} on port {}", n, self.client_id, self.port);

            let record = Record::build(&self.client_id, &buf[..n], &self.host, self.port, None);
            if let Err(e) = self.sink.add_record(record) {
                error!("Failed to submit record from {}: {}", self.client_id, e);
            }

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            // Empty acknowledgement: never echo, never close
            if let Err(e) = writer.write_all(b"").await {
                debug!("Write error to {} on port {}: {}", self.client_id, self.port, e);
                return;
            }
            if let Err(e) = writer.flush().await {
                debug!("Flush error to {} on port {}: {}", self.client_id, self.port, e);
                return;
            }
        }
    }
}
