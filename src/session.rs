//! Per-datacenter session pool.
//!
//! Each client identity owns one [`SessionPool`]. The pool keeps at most one
//! live session per datacenter, serializes creation behind a per-dc mutex,
//! and admits a bounded number of concurrent fetches per dc. Sessions are
//! never probed for liveness on acquire — breakage shows up at the first
//! failing send and is handled by `reset` + re-acquire.
//!
//! # Lifecycle
//!
//! ```text
//! acquire(dc) ──► pooled? ──yes──► Arc<Session> (shared, never closed by streams)
//!                   │no
//!                   ▼
//!            per-dc creation mutex
//!                   ▼
//!            dial ──► home dc? ──yes──► import persisted credentials
//!                   │no
//!                   ▼
//!            export (home session) ──► import ──► retry ×6 on rejection
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::Instant;

use crate::constants::{AUTH_IMPORT_RETRIES, REAPER_INTERVAL, SESSION_IDLE_TIMEOUT};
use crate::upstream::proto::{Request, Response, RpcError};
use crate::upstream::transport::{Connector, RpcSession};

/// An authenticated RPC channel to one datacenter.
///
/// Owned by the pool; streams borrow it by `Arc` and never close it.
pub struct Session {
    dc_id: u32,
    raw: Box<dyn RpcSession>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dc_id", &self.dc_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// The datacenter this session is bound to.
    pub fn dc_id(&self) -> u32 {
        self.dc_id
    }

    /// Issue one request and await its reply.
    pub async fn send(&self, request: Request) -> Result<Response, RpcError> {
        self.raw.send(request).await
    }

    async fn close(&self) {
        self.raw.close().await;
    }
}

/// Persisted authorization credentials for one datacenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthBlob {
    /// Credential id as issued by the upstream.
    pub id: i64,
    /// Opaque credential bytes.
    #[serde(with = "crate::upstream::proto::b64")]
    pub bytes: Vec<u8>,
}

/// On-disk store for per-identity auth blobs — the gateway's only durable
/// state.
#[derive(Debug, Clone)]
pub struct AuthStore {
    dir: PathBuf,
}

impl AuthStore {
    /// Open a store rooted at `dir` (created on first save).
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{identity}.auth.json"))
    }

    /// Load the persisted blobs for an identity; missing or unreadable
    /// files yield an empty map.
    pub fn load(&self, identity: &str) -> HashMap<u32, AuthBlob> {
        match std::fs::read(self.path(identity)) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                log::warn!("auth store for {identity} is unreadable: {e}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    /// Persist the blobs for an identity. Failures are logged, not fatal.
    pub fn save(&self, identity: &str, blobs: &HashMap<u32, AuthBlob>) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            log::warn!("cannot create auth store dir: {e}");
            return;
        }
        match serde_json::to_vec_pretty(blobs) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(self.path(identity), raw) {
                    log::warn!("cannot persist auth for {identity}: {e}");
                }
            }
            Err(e) => log::warn!("cannot encode auth for {identity}: {e}"),
        }
    }
}

/// One datacenter's slot in the pool.
struct DcEntry {
    /// Serializes session creation so concurrent acquirers trigger exactly
    /// one dial + handshake.
    creating: Mutex<()>,
    /// Admission for concurrent fetches against this dc.
    fetch_permits: Arc<Semaphore>,
    session: RwLock<Option<Arc<Session>>>,
    last_used: std::sync::Mutex<Instant>,
}

impl DcEntry {
    fn new(max_fetches: usize) -> Self {
        Self {
            creating: Mutex::new(()),
            fetch_permits: Arc::new(Semaphore::new(max_fetches)),
            session: RwLock::new(None),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }
}

/// Pool of per-datacenter sessions for one client identity.
pub struct SessionPool {
    identity: String,
    connector: Arc<dyn Connector>,
    home_dc: u32,
    home: Arc<Session>,
    entries: RwLock<HashMap<u32, Arc<DcEntry>>>,
    max_fetches_per_dc: usize,
    auth: std::sync::Mutex<HashMap<u32, AuthBlob>>,
    store: AuthStore,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("identity", &self.identity)
            .field("home_dc", &self.home_dc)
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Connect the identity's home session and build its pool.
    ///
    /// Persisted credentials for the home dc are imported when present;
    /// a fresh identity starts unauthorized and gains blobs as they are
    /// exported.
    ///
    /// # Errors
    ///
    /// Returns the dial or import error when the home session cannot be
    /// established.
    pub async fn connect(
        identity: String,
        connector: Arc<dyn Connector>,
        home_dc: u32,
        max_fetches_per_dc: usize,
        store: AuthStore,
    ) -> Result<Self, RpcError> {
        let auth = store.load(&identity);
        let raw = connector.dial(home_dc).await?;
        let home = Arc::new(Session {
            dc_id: home_dc,
            raw,
        });
        if let Some(blob) = auth.get(&home_dc) {
            home.send(Request::ImportAuth {
                id: blob.id,
                bytes: blob.bytes.clone(),
            })
            .await?;
            log::debug!("{identity}: imported persisted credentials for dc {home_dc}");
        }
        Ok(Self {
            identity,
            connector,
            home_dc,
            home,
            entries: RwLock::new(HashMap::new()),
            max_fetches_per_dc,
            auth: std::sync::Mutex::new(auth),
            store,
        })
    }

    /// The identity's always-on home session.
    pub fn home(&self) -> Arc<Session> {
        Arc::clone(&self.home)
    }

    async fn entry(&self, dc_id: u32) -> Arc<DcEntry> {
        if let Some(entry) = self.entries.read().await.get(&dc_id) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write().await;
        Arc::clone(
            entries
                .entry(dc_id)
                .or_insert_with(|| Arc::new(DcEntry::new(self.max_fetches_per_dc))),
        )
    }

    /// Return the pooled session for `dc_id`, creating one if absent.
    ///
    /// No liveness probe is performed; a stale session surfaces at its
    /// first failed send.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::AuthBytesInvalid`] when the authorization
    /// handshake exhausts its retries, or the underlying dial error.
    pub async fn acquire(&self, dc_id: u32) -> Result<Arc<Session>, RpcError> {
        let entry = self.entry(dc_id).await;
        if let Some(session) = entry.session.read().await.as_ref() {
            return Ok(Arc::clone(session));
        }

        let _creating = entry.creating.lock().await;
        // Someone else may have finished creating while we waited.
        if let Some(session) = entry.session.read().await.as_ref() {
            return Ok(Arc::clone(session));
        }

        let session = Arc::new(self.create(dc_id).await?);
        *entry.session.write().await = Some(Arc::clone(&session));
        *entry
            .last_used
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
        log::info!("{}: session to dc {dc_id} ready", self.identity);
        Ok(session)
    }

    /// Dial and authorize a fresh session for `dc_id`.
    async fn create(&self, dc_id: u32) -> Result<Session, RpcError> {
        let raw = self.connector.dial(dc_id).await?;
        let session = Session { dc_id, raw };

        if dc_id == self.home_dc {
            let blob = self.auth_blob(dc_id);
            if let Some(blob) = blob {
                session
                    .send(Request::ImportAuth {
                        id: blob.id,
                        bytes: blob.bytes,
                    })
                    .await?;
            }
            return Ok(session);
        }

        // Foreign dc: exchange an export/import handshake, re-exporting on
        // each attempt to absorb transiently invalid credentials.
        for attempt in 1..=AUTH_IMPORT_RETRIES {
            let exported = match self.home.send(Request::ExportAuth { dc_id }).await? {
                Response::Auth { id, bytes } => AuthBlob { id, bytes },
                other => {
                    session.close().await;
                    return Err(RpcError::Network {
                        message: format!("unexpected export reply: {other:?}"),
                    });
                }
            };
            match session
                .send(Request::ImportAuth {
                    id: exported.id,
                    bytes: exported.bytes.clone(),
                })
                .await
            {
                Ok(_) => {
                    self.remember_auth(dc_id, exported);
                    return Ok(session);
                }
                Err(RpcError::AuthBytesInvalid) => {
                    log::warn!(
                        "{}: dc {dc_id} rejected credentials (attempt {attempt}/{AUTH_IMPORT_RETRIES})",
                        self.identity
                    );
                }
                Err(other) => {
                    session.close().await;
                    return Err(other);
                }
            }
        }

        session.close().await;
        Err(RpcError::AuthBytesInvalid)
    }

    fn auth_blob(&self, dc_id: u32) -> Option<AuthBlob> {
        self.auth
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&dc_id)
            .cloned()
    }

    fn remember_auth(&self, dc_id: u32, blob: AuthBlob) {
        let snapshot = {
            let mut auth = self
                .auth
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            auth.insert(dc_id, blob);
            auth.clone()
        };
        self.store.save(&self.identity, &snapshot);
    }

    /// Remove and close the session for `dc_id`. Idempotent; close errors
    /// are ignored. A removed session is never re-inserted.
    pub async fn reset(&self, dc_id: u32) {
        let entry = self.entry(dc_id).await;
        let removed = entry.session.write().await.take();
        if let Some(session) = removed {
            log::info!("{}: resetting session to dc {dc_id}", self.identity);
            session.close().await;
        }
    }

    /// Stamp the dc's last-used time. Called before every fetch send.
    pub async fn touch(&self, dc_id: u32) {
        let entry = self.entry(dc_id).await;
        *entry
            .last_used
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    /// Acquire a fetch-admission permit for `dc_id`.
    pub async fn fetch_permit(&self, dc_id: u32) -> OwnedSemaphorePermit {
        let entry = self.entry(dc_id).await;
        Arc::clone(&entry.fetch_permits)
            .acquire_owned()
            .await
            .expect("fetch semaphore is never closed")
    }

    /// Close every idle session older than the idle timeout. Returns how
    /// many sessions were reaped.
    pub async fn reap_idle(&self) -> usize {
        let entries: Vec<(u32, Arc<DcEntry>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(dc, entry)| (*dc, Arc::clone(entry)))
            .collect();

        let mut reaped = 0;
        for (dc_id, entry) in entries {
            let idle = entry
                .last_used
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .elapsed();
            if idle < SESSION_IDLE_TIMEOUT {
                continue;
            }
            let removed = entry.session.write().await.take();
            if let Some(session) = removed {
                log::info!(
                    "{}: reaping dc {dc_id} session idle for {}s",
                    self.identity,
                    idle.as_secs()
                );
                session.close().await;
                reaped += 1;
            }
        }
        reaped
    }
}

/// Spawn the background idle reaper for a pool.
pub fn spawn_reaper(pool: Arc<SessionPool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(REAPER_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            pool.reap_idle().await;
        }
    })
}
