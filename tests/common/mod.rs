//! In-process fake upstream shared by the integration tests.
//!
//! Serves one deterministic file as message 42 in the storage channel,
//! with scriptable failure knobs (missing messages, one-shot reference
//! expiry, per-chunk delay) and counters for asserting call behavior.

// Not every test binary uses every knob.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use streamgate::upstream::proto::{Request, Response, RpcError, StoredMedia};
use streamgate::upstream::{Connector, RpcSession};
use streamgate::{
    AppState, AuthStore, ClientFleet, ClientIdentity, Config, FileId, FileKind, PropsCache,
};

/// 1 MiB + 1 byte: three 512 KiB-aligned chunks, the last one a single byte.
pub const FILE_SIZE: u64 = 1_048_577;

/// The stored message id every test uses.
pub const MSG_ID: i64 = 42;

/// Unique id whose first 6 characters are the URL hash.
pub const UNIQUE_ID: &str = "AbCdEfQrStUv";

/// Deterministic file contents.
pub fn file_byte(offset: u64) -> u8 {
    (offset.wrapping_mul(31) % 251) as u8
}

/// The full expected file body.
pub fn full_file() -> Vec<u8> {
    (0..FILE_SIZE).map(file_byte).collect()
}

/// Scriptable fake backend.
#[derive(Debug, Default)]
pub struct FakeBackend {
    /// Total `GetChunk` calls observed.
    pub chunk_calls: AtomicUsize,
    /// Total `ReadMessage` calls observed.
    pub read_calls: AtomicUsize,
    /// `GetChunk` calls currently in flight.
    pub inflight: AtomicUsize,
    /// High-water mark of concurrent `GetChunk` calls.
    pub peak_inflight: AtomicUsize,
    /// When set, the next `GetChunk` fails with an expired reference.
    pub expire_next_chunk: AtomicBool,
    /// When set, `ReadMessage` reports the message gone.
    pub message_missing: AtomicBool,
    /// Artificial per-chunk latency in milliseconds (to observe concurrency).
    pub chunk_delay_ms: AtomicUsize,
}

impl FakeBackend {
    pub fn descriptor() -> String {
        FileId {
            kind: FileKind::Document,
            dc_id: 1,
            media_id: 77,
            access_hash: -12345,
            file_reference: vec![9, 9, 9],
            thumb_size: String::new(),
            volume_id: 0,
            local_id: 0,
            chat_id: 0,
            chat_access_hash: 0,
            big: false,
        }
        .encode()
    }

    async fn handle(&self, request: Request) -> Result<Response, RpcError> {
        match request {
            Request::GetChunk { offset, limit, .. } => {
                self.chunk_calls.fetch_add(1, Ordering::SeqCst);
                if self.expire_next_chunk.swap(false, Ordering::SeqCst) {
                    return Err(RpcError::FileReferenceExpired);
                }

                let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_inflight.fetch_max(now, Ordering::SeqCst);
                let delay = self.chunk_delay_ms.load(Ordering::SeqCst);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay as u64)).await;
                }
                self.inflight.fetch_sub(1, Ordering::SeqCst);

                let end = (offset + u64::from(limit)).min(FILE_SIZE);
                let bytes = (offset.min(FILE_SIZE)..end).map(file_byte).collect();
                Ok(Response::Chunk { bytes })
            }
            Request::ReadMessage { msg_id, .. } => {
                self.read_calls.fetch_add(1, Ordering::SeqCst);
                if msg_id != MSG_ID || self.message_missing.load(Ordering::SeqCst) {
                    return Err(RpcError::MessageUnavailable);
                }
                Ok(Response::Media(StoredMedia {
                    descriptor: Self::descriptor(),
                    unique_id: UNIQUE_ID.into(),
                    file_size: FILE_SIZE,
                    mime_type: Some("video/mp4".into()),
                    file_name: Some("sample.mp4".into()),
                }))
            }
            Request::ExportAuth { .. } => Ok(Response::Auth {
                id: 1,
                bytes: vec![1, 2, 3],
            }),
            _ => Ok(Response::Ack),
        }
    }
}

struct FakeSession {
    backend: Arc<FakeBackend>,
}

#[async_trait]
impl RpcSession for FakeSession {
    async fn send(&self, request: Request) -> Result<Response, RpcError> {
        self.backend.handle(request).await
    }

    async fn close(&self) {}
}

/// Connector handing out sessions bound to one shared backend.
#[derive(Debug)]
pub struct FakeConnector {
    pub backend: Arc<FakeBackend>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn dial(&self, _dc_id: u32) -> Result<Box<dyn RpcSession>, RpcError> {
        Ok(Box::new(FakeSession {
            backend: Arc::clone(&self.backend),
        }))
    }
}

/// Build an app over the fake backend. Returns the router plus handles the
/// tests assert against.
pub async fn app() -> (axum::Router, Arc<FakeBackend>, tempfile::TempDir) {
    app_with_clients(1).await
}

/// Same as [`app`], with a configurable identity count.
pub async fn app_with_clients(
    count: usize,
) -> (axum::Router, Arc<FakeBackend>, tempfile::TempDir) {
    let backend = Arc::new(FakeBackend::default());
    let connector = Arc::new(FakeConnector {
        backend: Arc::clone(&backend),
    });
    let dir = tempfile::tempdir().unwrap();

    let mut clients = Vec::new();
    for i in 0..count {
        clients.push(Arc::new(
            ClientIdentity::connect(
                format!("client_{}", i + 1),
                Arc::clone(&connector) as Arc<dyn Connector>,
                1,
                2,
                AuthStore::new(dir.path().to_path_buf()),
            )
            .await
            .unwrap(),
        ));
    }

    let config = Config {
        storage_channel_id: -100_555,
        public_url: "http://localhost:8080/".into(),
        upstream_addrs: HashMap::new(),
        home_dc: 1,
        ..Config::default()
    };

    let state = AppState {
        fleet: Arc::new(ClientFleet::new(clients, config.global_stream_limit)),
        cache: Arc::new(PropsCache::new(config.storage_channel_id)),
        config: Arc::new(config),
        started: Instant::now(),
    };
    (streamgate::router(state), backend, dir)
}
