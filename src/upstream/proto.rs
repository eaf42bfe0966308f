//! Request/response model for the upstream RPC.
//!
//! Frames are serde envelopes; byte payloads travel base64-encoded so the
//! wire stays self-describing. Every request carries a correlation id and
//! gets exactly one reply.

use serde::{Deserialize, Serialize};

use crate::fileid::InputLocation;

/// Calls the gateway issues against the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// Fetch one aligned chunk of a file.
    GetChunk {
        location: InputLocation,
        offset: u64,
        limit: u32,
    },
    /// Export credentials usable to authorize against another datacenter.
    ExportAuth { dc_id: u32 },
    /// Import previously exported credentials into this session.
    ImportAuth {
        id: i64,
        #[serde(with = "b64")]
        bytes: Vec<u8>,
    },
    /// Read a stored message and describe its attached media.
    ReadMessage { channel_id: i64, msg_id: i64 },
    /// Liveness ping.
    Ping,
}

/// Successful replies, one per request shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    /// Chunk payload. May be shorter than the requested limit at EOF.
    Chunk {
        #[serde(with = "b64")]
        bytes: Vec<u8>,
    },
    /// Exported authorization credentials.
    Auth {
        id: i64,
        #[serde(with = "b64")]
        bytes: Vec<u8>,
    },
    /// Media attached to a stored message.
    Media(StoredMedia),
    /// Plain acknowledgement (import, ping).
    Ack,
}

/// What the upstream knows about a stored message's media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMedia {
    /// Opaque file descriptor (decoded by [`crate::fileid::FileId`]).
    pub descriptor: String,
    /// Stable per-file identifier; its first 6 characters gate public URLs.
    pub unique_id: String,
    /// Total file size in bytes.
    pub file_size: u64,
    /// Declared mime type, if any.
    pub mime_type: Option<String>,
    /// Original file name, if any.
    pub file_name: Option<String>,
}

/// Errors the upstream (or the wire to it) can produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum RpcError {
    /// Cooperative rate limit; retry after the given delay.
    FloodWait { seconds: u32 },
    /// The imported authorization bytes were rejected.
    AuthBytesInvalid,
    /// The file reference authorizing this fetch has expired.
    FileReferenceExpired,
    /// The referenced message does not exist or carries no media.
    MessageUnavailable,
    /// Transport-level failure (reset, refused, broken frame).
    Network { message: String },
    /// The call exceeded its read budget.
    Timeout,
    /// The session is closed.
    Closed,
    /// Any other upstream-reported error.
    Rpc { code: u16, message: String },
}

impl RpcError {
    /// Network-class failures trigger the halve-and-backoff retry path.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout | Self::Closed)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FloodWait { seconds } => write!(f, "flood wait of {seconds}s"),
            Self::AuthBytesInvalid => write!(f, "authorization bytes rejected"),
            Self::FileReferenceExpired => write!(f, "file reference expired"),
            Self::MessageUnavailable => write!(f, "message unavailable"),
            Self::Network { message } => write!(f, "network error: {message}"),
            Self::Timeout => write!(f, "read budget exceeded"),
            Self::Closed => write!(f, "session closed"),
            Self::Rpc { code, message } => write!(f, "rpc error {code}: {message}"),
        }
    }
}

impl std::error::Error for RpcError {}

/// One wire frame: a correlation id plus a request or reply body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame<T> {
    /// Correlation id; replies echo the id of their request.
    pub id: u64,
    /// Frame body.
    pub body: T,
}

/// Reply body: success or a typed error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(Response),
    Err(RpcError),
}

/// Serde adapter encoding byte fields as base64 strings.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_request_round_trips() {
        let request = Request::GetChunk {
            location: InputLocation::Document {
                media_id: 1,
                access_hash: 2,
                file_reference: vec![0, 1, 2],
                thumb_size: String::new(),
            },
            offset: 524_288,
            limit: 65_536,
        };
        let json = serde_json::to_string(&Frame { id: 7, body: request }).unwrap();
        let back: Frame<Request> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert!(matches!(
            back.body,
            Request::GetChunk { offset: 524_288, limit: 65_536, .. }
        ));
    }

    #[test]
    fn chunk_bytes_travel_as_base64() {
        let reply = Reply::Ok(Response::Chunk {
            bytes: vec![0u8; 32],
        });
        let json = serde_json::to_string(&Frame { id: 1, body: reply }).unwrap();
        assert!(json.contains("AAAA"), "expected base64 payload in {json}");
        let back: Frame<Reply> = serde_json::from_str(&json).unwrap();
        match back.body {
            Reply::Ok(Response::Chunk { bytes }) => assert_eq!(bytes, vec![0u8; 32]),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn flood_wait_round_trips_with_delay() {
        let json = serde_json::to_string(&Reply::Err(RpcError::FloodWait { seconds: 17 })).unwrap();
        let back: Reply = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            Reply::Err(RpcError::FloodWait { seconds: 17 })
        ));
    }

    #[test]
    fn network_classification() {
        assert!(RpcError::Timeout.is_network());
        assert!(RpcError::Closed.is_network());
        assert!(!RpcError::FloodWait { seconds: 1 }.is_network());
        assert!(!RpcError::FileReferenceExpired.is_network());
    }
}
