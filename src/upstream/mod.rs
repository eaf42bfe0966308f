//! Upstream RPC surface.
//!
//! The backend that actually stores file bytes is reached over long-lived
//! authenticated sessions. This module defines the request/response model
//! ([`proto`]), the connector/session seam the rest of the gateway is
//! written against ([`transport`]), and the default wire client ([`tcp`]).

pub mod proto;
pub mod tcp;
pub mod transport;

pub use proto::{Reply, Request, Response, RpcError, StoredMedia};
pub use tcp::TcpConnector;
pub use transport::{Connector, RpcSession};
