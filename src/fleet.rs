//! Client identities and stream load balancing.
//!
//! The gateway can run several upstream identities; every incoming stream
//! is routed to the identity with the fewest streams in flight. Counters
//! are debited through an RAII guard so every exit path — completion,
//! error, client disconnect, panic — releases its slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::session::{AuthStore, SessionPool};
use crate::upstream::proto::RpcError;
use crate::upstream::transport::Connector;

/// One set of upstream credentials plus its session pool.
#[derive(Debug)]
pub struct ClientIdentity {
    name: String,
    pool: Arc<SessionPool>,
}

impl ClientIdentity {
    /// Connect an identity: home session first, empty media pool.
    ///
    /// # Errors
    ///
    /// Returns the dial/import error when the home session cannot be
    /// established.
    pub async fn connect(
        name: String,
        connector: Arc<dyn Connector>,
        home_dc: u32,
        max_fetches_per_dc: usize,
        store: AuthStore,
    ) -> Result<Self, RpcError> {
        let pool = SessionPool::connect(
            name.clone(),
            connector,
            home_dc,
            max_fetches_per_dc,
            store,
        )
        .await?;
        Ok(Self {
            name,
            pool: Arc::new(pool),
        })
    }

    /// The identity's display name (`client_1`, `client_2`, ...).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identity's session pool.
    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }
}

/// The fleet of identities plus per-identity in-flight counters.
#[derive(Debug)]
pub struct ClientFleet {
    clients: Vec<Arc<ClientIdentity>>,
    loads: Vec<AtomicUsize>,
    stream_permits: Arc<Semaphore>,
}

impl ClientFleet {
    /// Build a fleet over already-connected identities.
    pub fn new(clients: Vec<Arc<ClientIdentity>>, global_stream_limit: usize) -> Self {
        let loads = clients.iter().map(|_| AtomicUsize::new(0)).collect();
        Self {
            clients,
            loads,
            stream_permits: Arc::new(Semaphore::new(global_stream_limit)),
        }
    }

    /// Number of connected identities.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the fleet is empty (startup failed to connect anything).
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Pick the identity with the fewest streams in flight; ties go to the
    /// lower index so selection is deterministic.
    pub fn pick(&self) -> (usize, Arc<ClientIdentity>) {
        let index = self
            .loads
            .iter()
            .enumerate()
            .min_by_key(|(_, load)| load.load(Ordering::SeqCst))
            .map(|(i, _)| i)
            .unwrap_or(0);
        (index, Arc::clone(&self.clients[index]))
    }

    /// Wait for a slot under the global stream cap.
    pub async fn admit(&self) -> OwnedSemaphorePermit {
        Arc::clone(&self.stream_permits)
            .acquire_owned()
            .await
            .expect("stream semaphore is never closed")
    }

    /// Register a stream against identity `index`. The returned guard
    /// decrements the counter when dropped.
    pub fn begin_stream(self: Arc<Self>, index: usize) -> StreamSlot {
        self.loads[index].fetch_add(1, Ordering::SeqCst);
        StreamSlot { fleet: self, index }
    }

    /// The connected identities, in pick order.
    pub fn clients(&self) -> &[Arc<ClientIdentity>] {
        &self.clients
    }

    /// Snapshot of per-identity loads, by identity index.
    pub fn loads(&self) -> Vec<(String, usize)> {
        self.clients
            .iter()
            .zip(&self.loads)
            .map(|(client, load)| (client.name().to_string(), load.load(Ordering::SeqCst)))
            .collect()
    }

    /// Total streams currently in flight.
    pub fn active_streams(&self) -> usize {
        self.loads.iter().map(|l| l.load(Ordering::SeqCst)).sum()
    }
}

/// RAII registration of one in-flight stream.
#[derive(Debug)]
pub struct StreamSlot {
    fleet: Arc<ClientFleet>,
    index: usize,
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        let previous = self.fleet.loads[self.index].fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "stream slot released twice");
    }
}
