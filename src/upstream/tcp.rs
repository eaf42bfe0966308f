//! Default wire client: length-delimited frames over TCP.
//!
//! Each frame is a serde_json envelope ([`Frame`]) behind a u32 length
//! prefix. One request gets one reply; the session holds the framed stream
//! behind a mutex, so sends are serialized and replies cannot interleave.
//! Correlation ids are still checked to catch a desynchronized peer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::constants::CONNECT_TIMEOUT;

use super::proto::{Frame, Reply, Request, Response, RpcError};
use super::transport::{Connector, RpcSession};

/// Dials datacenters from a static `dc_id → host:port` map.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addrs: HashMap<u32, String>,
}

impl TcpConnector {
    /// Create a connector over the configured datacenter addresses.
    pub fn new(addrs: HashMap<u32, String>) -> Self {
        Self { addrs }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn dial(&self, dc_id: u32) -> Result<Box<dyn RpcSession>, RpcError> {
        let addr = self.addrs.get(&dc_id).ok_or_else(|| RpcError::Network {
            message: format!("no address for dc {dc_id}"),
        })?;

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::Timeout)?
            .map_err(|e| RpcError::Network {
                message: format!("connect to dc {dc_id} failed: {e}"),
            })?;
        stream.set_nodelay(true).ok();

        log::debug!("dialed dc {dc_id} at {addr}");
        Ok(Box::new(TcpSession::new(stream)))
    }
}

/// A live framed connection to one datacenter.
pub struct TcpSession {
    framed: Mutex<Framed<TcpStream, LengthDelimitedCodec>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for TcpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSession")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl TcpSession {
    fn new(stream: TcpStream) -> Self {
        Self {
            framed: Mutex::new(Framed::new(stream, LengthDelimitedCodec::new())),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RpcSession for TcpSession {
    async fn send(&self, request: Request) -> Result<Response, RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_vec(&Frame { id, body: request }).map_err(|e| {
            RpcError::Network {
                message: format!("encode failed: {e}"),
            }
        })?;

        let mut framed = self.framed.lock().await;
        framed
            .send(frame.into())
            .await
            .map_err(|e| RpcError::Network {
                message: format!("send failed: {e}"),
            })?;

        let raw = framed
            .next()
            .await
            .ok_or(RpcError::Closed)?
            .map_err(|e| RpcError::Network {
                message: format!("read failed: {e}"),
            })?;
        drop(framed);

        let reply: Frame<Reply> =
            serde_json::from_slice(&raw).map_err(|e| RpcError::Network {
                message: format!("broken frame: {e}"),
            })?;
        if reply.id != id {
            return Err(RpcError::Network {
                message: format!("correlation mismatch: sent {id}, got {}", reply.id),
            });
        }

        match reply.body {
            Reply::Ok(response) => Ok(response),
            Reply::Err(err) => Err(err),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut framed = self.framed.lock().await;
        let _ = framed.close().await;
    }
}
