//! TCP Message Exchange
//!
//! One persistent TCP connection per peer. Requests on a connection are
//! serialized: a request holds the connection until its response line has
//! been read, so responses never interleave.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::commands::{tagged, Response};
use super::traits::{MessageExchange, ResponseSender};
use crate::error::{CacheError, Result};
use crate::transport_error;

struct PeerConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl PeerConnection {
    /// Write one request line and read until the response carrying `tag`.
    /// Lines left over from an earlier timed-out request are discarded.
    async fn round_trip(&mut self, request: &str, tag: &str) -> Result<String> {
        self.writer.write_all(request.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await?;
            if read == 0 {
                return Err(transport_error!("Connection closed by peer"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if Response::parse(line).map(|r| r.tag) == Some(tag) {
                return Ok(line.to_string());
            }
            warn!("Discarding stale response line while waiting for {}", tag);
        }
    }
}

pub struct TcpExchange {
    connections: RwLock<HashMap<String, Arc<Mutex<PeerConnection>>>>,
    next_tag: AtomicU64,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpExchange {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            connect_timeout,
            request_timeout,
        }
    }

    pub async fn is_connected(&self, address: &str) -> bool {
        self.connections.read().await.contains_key(address)
    }

    fn tag(&self) -> String {
        format!("{:x}", self.next_tag.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl MessageExchange for TcpExchange {
    async fn connect(&self, address: &str) -> Result<()> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                CacheError::ConnectionFailure(format!("Connect to {} timed out", address))
            })?
            .map_err(|e| CacheError::ConnectionFailure(format!("{}: {}", address, e)))?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let connection = PeerConnection {
            reader: BufReader::new(read_half),
            writer: write_half,
        };
        self.connections
            .write()
            .await
            .insert(address.to_string(), Arc::new(Mutex::new(connection)));
        debug!("Connected to {}", address);
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        let removed = self.connections.write().await.remove(address);
        match removed {
            Some(connection) => {
                let mut connection = connection.lock().await;
                if let Err(e) = connection.writer.shutdown().await {
                    debug!("Shutdown of {} failed: {}", address, e);
                }
                Ok(())
            }
            None => Err(transport_error!("Not connected to {}", address)),
        }
    }

    async fn send_request(
        &self,
        address: &str,
        command: &str,
        respond_to: ResponseSender,
    ) -> Result<()> {
        let connection = self
            .connections
            .read()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| transport_error!("Not connected to {}", address))?;

        let tag = self.tag();
        let request = tagged(&tag, command);
        let address = address.to_string();
        let request_timeout = self.request_timeout;

        tokio::spawn(async move {
            let mut connection = connection.lock().await;
            match timeout(request_timeout, connection.round_trip(&request, &tag)).await {
                Ok(Ok(line)) => {
                    if respond_to.send(line).await.is_err() {
                        debug!("[{}] Response receiver dropped for {}", address, tag);
                    }
                }
                Ok(Err(e)) => debug!("[{}] Request {} failed: {}", address, tag, e),
                Err(_) => debug!("[{}] Request {} timed out", address, tag),
            }
        });
        Ok(())
    }
}
