//! Cached file properties per stored message.
//!
//! A miss costs one upstream message read; hits are lock-read only. The
//! whole cache is flushed on a coarse timer instead of tracking per-entry
//! ages, and individual entries are dropped when the upstream reports an
//! expired file reference.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::constants::CACHE_TTL;
use crate::error::MalformedDescriptor;
use crate::fileid::FileId;
use crate::session::Session;
use crate::upstream::proto::{Request, Response, RpcError};

/// Everything the gateway knows about one stored file.
#[derive(Debug, Clone)]
pub struct FileProperties {
    /// Decoded file descriptor.
    pub file_id: FileId,
    /// Stable per-file identifier.
    pub unique_id: String,
    /// Total size in bytes.
    pub file_size: u64,
    /// Declared mime type, if any.
    pub mime_type: Option<String>,
    /// Original file name, if any.
    pub file_name: Option<String>,
}

impl FileProperties {
    /// The 6-character prefix gating public URLs.
    pub fn hash_prefix(&self) -> &str {
        let end = self
            .unique_id
            .char_indices()
            .nth(6)
            .map_or(self.unique_id.len(), |(i, _)| i);
        &self.unique_id[..end]
    }
}

/// Failure to resolve a message into file properties.
#[derive(Debug)]
pub enum PropsError {
    /// The message does not exist or carries no media.
    Unavailable,
    /// The stored descriptor did not decode.
    Malformed(MalformedDescriptor),
    /// The upstream call failed.
    Rpc(RpcError),
}

impl std::fmt::Display for PropsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "message unavailable"),
            Self::Malformed(e) => write!(f, "malformed descriptor: {e}"),
            Self::Rpc(e) => write!(f, "lookup failed: {e}"),
        }
    }
}

impl std::error::Error for PropsError {}

/// Process-wide msg_id → properties cache.
#[derive(Debug)]
pub struct PropsCache {
    channel_id: i64,
    entries: RwLock<HashMap<i64, Arc<FileProperties>>>,
}

impl PropsCache {
    /// Create an empty cache bound to the storage channel.
    pub fn new(channel_id: i64) -> Self {
        Self {
            channel_id,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the properties for `msg_id`, consulting the upstream once
    /// on a miss.
    ///
    /// # Errors
    ///
    /// [`PropsError::Unavailable`] when the message is gone or mediless;
    /// [`PropsError::Malformed`] when its descriptor does not decode.
    pub async fn get(
        &self,
        session: &Session,
        msg_id: i64,
    ) -> Result<Arc<FileProperties>, PropsError> {
        if let Some(props) = self.entries.read().await.get(&msg_id) {
            return Ok(Arc::clone(props));
        }

        let media = match session
            .send(Request::ReadMessage {
                channel_id: self.channel_id,
                msg_id,
            })
            .await
        {
            Ok(Response::Media(media)) => media,
            Ok(_) => return Err(PropsError::Unavailable),
            Err(RpcError::MessageUnavailable) => return Err(PropsError::Unavailable),
            Err(e) => return Err(PropsError::Rpc(e)),
        };

        let file_id = FileId::decode(&media.descriptor).map_err(PropsError::Malformed)?;
        let props = Arc::new(FileProperties {
            file_id,
            unique_id: media.unique_id,
            file_size: media.file_size,
            mime_type: media.mime_type,
            file_name: media.file_name,
        });

        log::debug!("cached file properties for message {msg_id}");
        self.entries
            .write()
            .await
            .insert(msg_id, Arc::clone(&props));
        Ok(props)
    }

    /// Drop one entry; the next `get` re-resolves it.
    pub async fn invalidate(&self, msg_id: i64) {
        if self.entries.write().await.remove(&msg_id).is_some() {
            log::debug!("invalidated cached properties for message {msg_id}");
        }
    }

    /// Drop every entry.
    pub async fn flush(&self) {
        let mut entries = self.entries.write().await;
        let dropped = entries.len();
        entries.clear();
        if dropped > 0 {
            log::debug!("flushed {dropped} cached file properties");
        }
    }

    /// Entries currently cached.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Spawn the periodic full flush.
pub fn spawn_flusher(cache: Arc<PropsCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(CACHE_TTL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // the first tick is immediate
        loop {
            tick.tick().await;
            cache.flush().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileid::FileKind;
    use crate::session::{AuthStore, SessionPool};
    use crate::upstream::proto::StoredMedia;
    use crate::upstream::transport::{Connector, RpcSession};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn descriptor() -> String {
        FileId {
            kind: FileKind::Document,
            dc_id: 4,
            media_id: 10,
            access_hash: 20,
            file_reference: vec![1, 2],
            thumb_size: String::new(),
            volume_id: 0,
            local_id: 0,
            chat_id: 0,
            chat_access_hash: 0,
            big: false,
        }
        .encode()
    }

    /// Backend that counts message reads and can be told the message is gone.
    struct MediaSession {
        reads: Arc<AtomicUsize>,
        gone: bool,
    }

    #[async_trait]
    impl RpcSession for MediaSession {
        async fn send(&self, request: Request) -> Result<Response, RpcError> {
            match request {
                Request::ReadMessage { .. } => {
                    self.reads.fetch_add(1, Ordering::SeqCst);
                    if self.gone {
                        Err(RpcError::MessageUnavailable)
                    } else {
                        Ok(Response::Media(StoredMedia {
                            descriptor: descriptor(),
                            unique_id: "AgADFxacSitvbUFL".into(),
                            file_size: 1_048_577,
                            mime_type: Some("video/mp4".into()),
                            file_name: Some("clip.mp4".into()),
                        }))
                    }
                }
                _ => Ok(Response::Ack),
            }
        }

        async fn close(&self) {}
    }

    struct MediaConnector {
        reads: Arc<AtomicUsize>,
        gone: bool,
    }

    #[async_trait]
    impl Connector for MediaConnector {
        async fn dial(&self, _dc_id: u32) -> Result<Box<dyn RpcSession>, RpcError> {
            Ok(Box::new(MediaSession {
                reads: Arc::clone(&self.reads),
                gone: self.gone,
            }))
        }
    }

    async fn session_with(gone: bool) -> (Arc<Session>, Arc<AtomicUsize>, tempfile::TempDir) {
        let reads = Arc::new(AtomicUsize::new(0));
        let dir = tempfile::tempdir().unwrap();
        let pool = SessionPool::connect(
            "client_1".into(),
            Arc::new(MediaConnector {
                reads: Arc::clone(&reads),
                gone,
            }) as Arc<dyn Connector>,
            2,
            2,
            AuthStore::new(dir.path().to_path_buf()),
        )
        .await
        .unwrap();
        (pool.home(), reads, dir)
    }

    #[tokio::test]
    async fn miss_reads_once_then_hits() {
        let (session, reads, _dir) = session_with(false).await;
        let cache = PropsCache::new(-100);

        let first = cache.get(&session, 42).await.unwrap();
        let second = cache.get(&session, 42).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(first.hash_prefix(), "AgADFx");
        assert_eq!(first.file_size, 1_048_577);
    }

    #[tokio::test]
    async fn missing_message_is_unavailable() {
        let (session, _reads, _dir) = session_with(true).await;
        let cache = PropsCache::new(-100);
        assert!(matches!(
            cache.get(&session, 7).await,
            Err(PropsError::Unavailable)
        ));
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn invalidate_forces_a_reread() {
        let (session, reads, _dir) = session_with(false).await;
        let cache = PropsCache::new(-100);
        cache.get(&session, 42).await.unwrap();
        cache.invalidate(42).await;
        cache.get(&session, 42).await.unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flush_empties_everything() {
        let (session, _reads, _dir) = session_with(false).await;
        let cache = PropsCache::new(-100);
        cache.get(&session, 1).await.unwrap();
        cache.get(&session, 2).await.unwrap();
        assert_eq!(cache.len().await, 2);
        cache.flush().await;
        assert_eq!(cache.len().await, 0);
    }
}
