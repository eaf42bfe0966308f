//! Retrying, adaptive-sized chunk fetches.
//!
//! One call = one upstream chunk, with the recovery the wire demands:
//! cooperative rate-limit waits (outside the retry budget), exponential
//! backoff with session reset on network failures, and a shrinking request
//! size so a struggling link still makes progress.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::constants::{BACKOFF_BASE_SECS, CHUNK_READ_TIMEOUT, MAX_RETRIES, MIN_CHUNK};
use crate::fileid::InputLocation;
use crate::session::{Session, SessionPool};
use crate::upstream::proto::{Request, Response, RpcError};

/// Why a chunk fetch gave up.
#[derive(Debug)]
pub enum FetchError {
    /// The file reference expired; the descriptor must be re-resolved.
    Stale,
    /// Re-acquiring a session failed during recovery.
    Session(RpcError),
    /// The upstream returned an unrecoverable error.
    Upstream(RpcError),
    /// The retry budget ran out on network failures.
    Exhausted,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stale => write!(f, "file reference expired"),
            Self::Session(e) => write!(f, "session recovery failed: {e}"),
            Self::Upstream(e) => write!(f, "upstream error: {e}"),
            Self::Exhausted => write!(f, "fetch retries exhausted"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Fetch one aligned chunk at `offset`.
///
/// `session` is the stream's borrowed session; it is replaced in place when
/// recovery resets it, so subsequent parts reuse the fresh one. The request
/// size starts at `limit` and halves on every network-class failure, never
/// below the minimum; it is not grown back within this call.
///
/// # Errors
///
/// [`FetchError::Stale`] on an expired file reference, [`FetchError::Upstream`]
/// on unexpected upstream errors, [`FetchError::Exhausted`] when the retry
/// budget runs out.
pub async fn fetch_chunk(
    pool: &SessionPool,
    session: &mut Arc<Session>,
    location: &InputLocation,
    offset: u64,
    limit: u32,
) -> Result<Bytes, FetchError> {
    let dc_id = session.dc_id();
    let mut current_limit = limit.max(MIN_CHUNK);

    for attempt in 1..=MAX_RETRIES {
        pool.touch(dc_id).await;

        let call = session.send(Request::GetChunk {
            location: location.clone(),
            offset,
            limit: current_limit,
        });
        let outcome = match tokio::time::timeout(CHUNK_READ_TIMEOUT, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Timeout),
        };

        match outcome {
            Ok(Response::Chunk { bytes }) => return Ok(Bytes::from(bytes)),
            Ok(other) => {
                return Err(FetchError::Upstream(RpcError::Network {
                    message: format!("unexpected chunk reply: {other:?}"),
                }))
            }
            Err(RpcError::FloodWait { seconds }) => {
                // Server-paced wait; does not consume the retry budget.
                log::warn!("dc {dc_id}: flood wait of {seconds}s at offset {offset}");
                tokio::time::sleep(Duration::from_secs(u64::from(seconds))).await;
            }
            Err(RpcError::FileReferenceExpired) => return Err(FetchError::Stale),
            Err(e) if e.is_network() => {
                current_limit = (current_limit / 2).max(MIN_CHUNK);
                let backoff = Duration::from_secs(BACKOFF_BASE_SECS.pow(attempt));
                log::warn!(
                    "dc {dc_id}: {e}; retry {attempt}/{MAX_RETRIES} in {}s at limit {current_limit}",
                    backoff.as_secs()
                );
                tokio::time::sleep(backoff).await;
                pool.reset(dc_id).await;
                *session = pool.acquire(dc_id).await.map_err(FetchError::Session)?;
            }
            Err(other) => return Err(FetchError::Upstream(other)),
        }
    }

    Err(FetchError::Exhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AuthStore;
    use crate::upstream::transport::{Connector, RpcSession};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn doc_location() -> InputLocation {
        InputLocation::Document {
            media_id: 1,
            access_hash: 2,
            file_reference: vec![],
            thumb_size: String::new(),
        }
    }

    /// Scripted session: pops one outcome per send, records requested limits.
    struct ScriptedSession {
        script: Mutex<Vec<Result<Response, RpcError>>>,
        limits: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl RpcSession for ScriptedSession {
        async fn send(&self, request: Request) -> Result<Response, RpcError> {
            if let Request::GetChunk { limit, .. } = request {
                self.limits
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(limit);
            }
            let mut script = self
                .script
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if script.is_empty() {
                Ok(Response::Chunk { bytes: vec![1] })
            } else {
                script.remove(0)
            }
        }

        async fn close(&self) {}
    }

    /// Connector that scripts each dialed session in order; sessions past
    /// the end of the queue always succeed.
    struct ScriptedConnector {
        scripts: Mutex<VecDeque<Vec<Result<Response, RpcError>>>>,
        limits: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn dial(&self, _dc_id: u32) -> Result<Box<dyn RpcSession>, RpcError> {
            let script = self
                .scripts
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front()
                .unwrap_or_default();
            Ok(Box::new(ScriptedSession {
                script: Mutex::new(script),
                limits: Arc::clone(&self.limits),
            }))
        }
    }

    /// Pool whose home session is plain and whose first media session
    /// follows `script`.
    async fn scripted_pool(
        script: Vec<Result<Response, RpcError>>,
    ) -> (Arc<SessionPool>, Arc<Mutex<Vec<u32>>>, tempfile::TempDir) {
        let limits = Arc::new(Mutex::new(Vec::new()));
        let connector = Arc::new(ScriptedConnector {
            // First dial is the home session; the media session is second.
            scripts: Mutex::new(VecDeque::from([Vec::new(), script])),
            limits: Arc::clone(&limits),
        });
        let dir = tempfile::tempdir().unwrap();
        let pool = SessionPool::connect(
            "client_1".into(),
            connector as Arc<dyn Connector>,
            2,
            2,
            AuthStore::new(dir.path().to_path_buf()),
        )
        .await
        .unwrap();
        (Arc::new(pool), limits, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn network_failures_halve_the_limit_and_reset() {
        let (pool, limits, _dir) = scripted_pool(vec![Err(RpcError::Network {
            message: "reset by peer".into(),
        })])
        .await;

        let mut session = pool.acquire(2).await.unwrap();
        let bytes = fetch_chunk(&pool, &mut session, &doc_location(), 0, 512 * 1024)
            .await
            .unwrap();
        assert_eq!(bytes, Bytes::from_static(&[1]));

        let seen = limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        // First try at the full limit, retry at half on the fresh session.
        assert_eq!(seen, vec![512 * 1024, 256 * 1024]);
    }

    #[tokio::test(start_paused = true)]
    async fn limit_never_shrinks_below_the_floor() {
        let failure = || {
            Err(RpcError::Network {
                message: "reset".into(),
            })
        };
        // Five failing sessions in a row, then an always-ok one.
        let (pool, limits, _dir) = {
            let limits = Arc::new(Mutex::new(Vec::new()));
            let connector = Arc::new(ScriptedConnector {
                scripts: Mutex::new(VecDeque::from([
                    Vec::new(),
                    vec![failure()],
                    vec![failure()],
                    vec![failure()],
                    vec![failure()],
                    vec![failure()],
                ])),
                limits: Arc::clone(&limits),
            });
            let dir = tempfile::tempdir().unwrap();
            let pool = SessionPool::connect(
                "client_1".into(),
                connector as Arc<dyn Connector>,
                2,
                2,
                AuthStore::new(dir.path().to_path_buf()),
            )
            .await
            .unwrap();
            (Arc::new(pool), limits, dir)
        };

        let mut session = pool.acquire(2).await.unwrap();
        let bytes = fetch_chunk(&pool, &mut session, &doc_location(), 0, 512 * 1024)
            .await
            .unwrap();
        assert_eq!(bytes, Bytes::from_static(&[1]));

        let seen = limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        assert_eq!(
            seen,
            vec![
                512 * 1024,
                256 * 1024,
                128 * 1024,
                64 * 1024,
                64 * 1024,
                64 * 1024
            ],
            "limit halves down to the floor and stays there"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_does_not_consume_retries() {
        struct FloodingSession {
            remaining: AtomicU32,
        }

        #[async_trait]
        impl RpcSession for FloodingSession {
            async fn send(&self, _request: Request) -> Result<Response, RpcError> {
                let floods_left = self
                    .remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if floods_left {
                    Err(RpcError::FloodWait { seconds: 1 })
                } else {
                    Ok(Response::Chunk { bytes: vec![9] })
                }
            }

            async fn close(&self) {}
        }

        struct FloodingConnector;

        #[async_trait]
        impl Connector for FloodingConnector {
            async fn dial(&self, _dc_id: u32) -> Result<Box<dyn RpcSession>, RpcError> {
                Ok(Box::new(FloodingSession {
                    remaining: AtomicU32::new(10),
                }))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let pool = SessionPool::connect(
            "client_1".into(),
            Arc::new(FloodingConnector) as Arc<dyn Connector>,
            2,
            2,
            AuthStore::new(dir.path().to_path_buf()),
        )
        .await
        .unwrap();

        // 10 flood waits exceed the retry budget of 6; the fetch must still
        // succeed because flood waits are not retries.
        let mut session = pool.acquire(2).await.unwrap();
        let bytes = fetch_chunk(&pool, &mut session, &doc_location(), 0, MIN_CHUNK)
            .await
            .unwrap();
        assert_eq!(bytes, Bytes::from_static(&[9]));
    }

    #[tokio::test]
    async fn expired_reference_is_stale() {
        let (pool, _limits, _dir) =
            scripted_pool(vec![Err(RpcError::FileReferenceExpired)]).await;
        let mut session = pool.acquire(2).await.unwrap();
        assert!(matches!(
            fetch_chunk(&pool, &mut session, &doc_location(), 0, MIN_CHUNK).await,
            Err(FetchError::Stale)
        ));
    }

    #[tokio::test]
    async fn unexpected_rpc_error_surfaces() {
        let (pool, _limits, _dir) = scripted_pool(vec![Err(RpcError::Rpc {
            code: 400,
            message: "LIMIT_INVALID".into(),
        })])
        .await;
        let mut session = pool.acquire(2).await.unwrap();
        assert!(matches!(
            fetch_chunk(&pool, &mut session, &doc_location(), 0, MIN_CHUNK).await,
            Err(FetchError::Upstream(RpcError::Rpc { .. }))
        ));
    }
}
