//! Error taxonomy for the streaming data plane.
//!
//! Everything the HTTP layer can surface to a client is a [`StreamError`];
//! the mapping to status codes lives in the HTTP module. Wire-level errors
//! from the upstream RPC transport are a separate type
//! ([`crate::upstream::proto::RpcError`]) and are digested into these
//! variants before crossing the HTTP boundary.

/// Errors surfaced by the streaming data plane.
#[derive(Debug)]
pub enum StreamError {
    /// The URL hash does not match the file's unique identifier.
    InvalidHash,
    /// The stored message does not exist.
    FileNotFound,
    /// The stored message exists but no longer carries media.
    MessageUnavailable,
    /// The requested byte range cannot be satisfied.
    RangeNotSatisfiable,
    /// The file reference expired mid-fetch; the cache entry was dropped.
    Stale,
    /// The authorization handshake with a foreign datacenter failed.
    AuthFailed,
    /// The upstream returned an error the gateway cannot recover from.
    Upstream(String),
    /// The HTTP client went away mid-stream.
    Disconnected,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHash => write!(f, "Invalid hash"),
            Self::FileNotFound => write!(f, "File not found"),
            Self::MessageUnavailable => write!(f, "Message no longer carries media"),
            Self::RangeNotSatisfiable => write!(f, "Range not satisfiable"),
            Self::Stale => write!(f, "File reference expired"),
            Self::AuthFailed => write!(f, "Upstream authorization failed"),
            Self::Upstream(msg) => write!(f, "Upstream error: {msg}"),
            Self::Disconnected => write!(f, "Client disconnected"),
        }
    }
}

impl std::error::Error for StreamError {}

/// The opaque file descriptor could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedDescriptor {
    /// The base64 envelope did not decode.
    Encoding,
    /// The payload ended before a required field.
    Truncated,
    /// The type tag is not one the gateway serves.
    UnknownType(u32),
    /// The descriptor points at a web location, which cannot be fetched
    /// through the chunk API.
    WebLocation,
}

impl std::fmt::Display for MalformedDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoding => write!(f, "descriptor is not valid base64"),
            Self::Truncated => write!(f, "descriptor payload is truncated"),
            Self::UnknownType(tag) => write!(f, "unknown file type tag {tag}"),
            Self::WebLocation => write!(f, "web locations are not streamable"),
        }
    }
}

impl std::error::Error for MalformedDescriptor {}
