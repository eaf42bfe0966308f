//! Periodic home-session pings.
//!
//! NAT mappings and idle upstream links drop silently; a cheap ping every
//! 20 seconds keeps each identity's home session warm. Failures are logged
//! and the loop keeps going — a dead ping surfaces properly at the next
//! real send.

use std::sync::Arc;

use crate::constants::KEEPALIVE_INTERVAL;
use crate::fleet::ClientFleet;
use crate::upstream::proto::Request;

/// Spawn the keepalive loop over every connected identity.
pub fn spawn(fleet: Arc<ClientFleet>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(KEEPALIVE_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // first tick fires immediately
        loop {
            tick.tick().await;
            for client in fleet.clients() {
                if let Err(e) = client.pool().home().send(Request::Ping).await {
                    log::warn!("keepalive ping for {} failed: {e}", client.name());
                }
            }
        }
    })
}
