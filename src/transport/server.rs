//! TCP command server
//!
//! Accepts line-oriented connections and answers each tagged request
//! against the local cache. Lookups served here never cascade to peers.
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::commands::{failed, fulfilled, Command, Request};
use crate::cache::Cache;
use crate::error::{CacheError, Result};

const OK: &str = "OK";
// tag used when a request line carried no usable tag
const UNTAGGED: &str = "0";

pub struct CommandServer {
    listener: TcpListener,
    cache: Arc<Cache>,
}

impl CommandServer {
    pub async fn bind(address: &str, cache: Arc<Cache>) -> Result<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            CacheError::Transport(format!("Failed to bind {}: {}", address, e))
        })?;
        Ok(Self { listener, cache })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Command server listening on {}", addr);
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Command server stopping");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("TCP accept failed: {}", e);
                            continue;
                        }
                    };
                    let cache = Arc::clone(&self.cache);
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, cache, cancel).await {
                            debug!("[{}] Connection ended: {}", peer_addr, e);
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    cache: Arc<Cache>,
    cancel: CancellationToken,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match Request::parse(&line) {
            Ok(request) => dispatch(&cache, request).await,
            Err(e) => {
                warn!("Rejecting request: {}", e);
                let tag = line
                    .split_once(':')
                    .map(|(tag, _)| tag)
                    .filter(|tag| !tag.is_empty() && !tag.contains(' '))
                    .unwrap_or(UNTAGGED);
                format!("{}\n", failed(tag, &e.to_string()))
            }
        };
        write_half.write_all(response.as_bytes()).await?;
        write_half.flush().await?;
    }
}

/// Answer one request; the result is a complete newline-terminated line
pub async fn dispatch(cache: &Cache, request: Request) -> String {
    let tag = request.tag.as_str();
    let result = match request.command {
        Command::Get { key } => {
            let value = cache.get_local(&key).unwrap_or_default();
            Ok(format!("{}:{}", key, value))
        }
        Command::Set { key, value } => cache.set(&key, &value).map(|_| OK.to_string()),
        Command::SetEx {
            key,
            ttl_seconds,
            value,
        } => cache
            .set_expiration(&key, &value, ttl_seconds)
            .map(|_| OK.to_string()),
        Command::Peers => return cache.list_peers(tag).await,
        Command::Filter => cache.filter_string(),
        Command::AddPeer { address } => cache.add_peer(&address).await.map(|_| OK.to_string()),
        Command::Disconnect { address } => Ok(cache.disconnect_peer(&address).await),
    };
    match result {
        Ok(payload) => format!("{}\n", fulfilled(tag, &payload)),
        Err(e) => {
            warn!("[{}] Request failed: {}", tag, e);
            format!("{}\n", failed(tag, &e.to_string()))
        }
    }
}
