//! Connector and session seam.
//!
//! The pool, fetcher, and HTTP layer are written against these traits.
//! Production uses [`crate::upstream::tcp::TcpConnector`]; tests plug in an
//! in-process fake. Sessions are expected to serialize their own sends —
//! callers may share one session across concurrent streams.

use async_trait::async_trait;

use super::proto::{Request, Response, RpcError};

/// One authenticated RPC channel to a specific datacenter.
#[async_trait]
pub trait RpcSession: Send + Sync {
    /// Issue one request and await its reply.
    ///
    /// # Errors
    ///
    /// Returns the upstream's typed error, or a network-class [`RpcError`]
    /// when the wire fails.
    async fn send(&self, request: Request) -> Result<Response, RpcError>;

    /// Close the underlying connection. Errors are ignored; a closed
    /// session rejects further sends with [`RpcError::Closed`].
    async fn close(&self);
}

/// Dials datacenters and hands out fresh sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a media-mode session to the given datacenter.
    ///
    /// # Errors
    ///
    /// Returns a network-class [`RpcError`] when the datacenter is unknown
    /// or unreachable within the connect timeout.
    async fn dial(&self, dc_id: u32) -> Result<Box<dyn RpcSession>, RpcError>;
}
