//! Plan execution: pull chunks, slice head and tail, emit the body.
//!
//! One driver instance serves one HTTP response. It borrows a pooled
//! session once at the start and walks the plan's aligned chunks in
//! ascending offset order. The in-flight accounting lives in RAII guards
//! captured by the body stream, so a client that disconnects mid-download
//! releases its slots the moment the body is dropped.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::OwnedSemaphorePermit;

use crate::error::StreamError;
use crate::fetch::{fetch_chunk, FetchError};
use crate::fleet::{ClientFleet, ClientIdentity};
use crate::props::{FileProperties, PropsCache};
use crate::range::RangePlan;

/// Cut one fetched chunk down to the bytes the plan wants emitted.
///
/// Cuts are clamped to the actual chunk length; a short read never panics,
/// it just emits what arrived.
fn slice_part(data: &Bytes, part: u64, plan: &RangePlan) -> Bytes {
    let len = data.len();
    let first_cut = plan.first_cut.min(len);
    let last_cut = plan.last_cut.min(len);

    if plan.part_count == 1 {
        data.slice(first_cut..last_cut.max(first_cut))
    } else if part == 1 {
        data.slice(first_cut..)
    } else if part == plan.part_count {
        data.slice(..last_cut)
    } else {
        data.clone()
    }
}

/// Everything one body stream needs to run and account for itself.
#[derive(Debug)]
pub struct StreamContext {
    /// Fleet whose work-load counter this stream debits.
    pub fleet: Arc<ClientFleet>,
    /// Index of the serving identity within the fleet.
    pub index: usize,
    /// The serving identity.
    pub client: Arc<ClientIdentity>,
    /// Resolved properties of the file being streamed.
    pub props: Arc<FileProperties>,
    /// Cache to invalidate when the file reference expires.
    pub cache: Arc<PropsCache>,
    /// The stored message id, for cache invalidation and logging.
    pub msg_id: i64,
}

/// Build the response body for one planned range.
///
/// The returned stream owns every resource it needs: the global stream
/// permit, the per-identity work-load slot, and the per-dc fetch permit.
/// All three are released on any exit path, including mid-body drop.
///
/// A chunk failure mid-stream is terminal: the error is logged, the cache
/// entry is invalidated when the file reference expired, and the body is
/// closed without driver-level retry.
pub fn stream_body(
    ctx: StreamContext,
    plan: RangePlan,
    permit: OwnedSemaphorePermit,
) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
    async_stream::try_stream! {
        let StreamContext { fleet, index, client, props, cache, msg_id } = ctx;
        let _permit = permit;
        let _slot = fleet.begin_stream(index);

        let pool = Arc::clone(client.pool());
        let dc_id = props.file_id.dc_id;
        let _dc_permit = pool.fetch_permit(dc_id).await;

        let mut session = pool
            .acquire(dc_id)
            .await
            .map_err(|e| StreamError::Upstream(e.to_string()))?;
        let location = props.file_id.location();
        // The plan's chunk size already accounts for thumbnail locations.
        let limit = plan.chunk_size as u32;

        log::debug!(
            "{}: streaming msg {msg_id} bytes {}-{} in {} part(s) from dc {dc_id}",
            client.name(),
            plan.start,
            plan.end,
            plan.part_count
        );

        let mut offset = plan.offset_base;
        let mut part = 1u64;
        while part <= plan.part_count {
            let data = match fetch_chunk(&pool, &mut session, &location, offset, limit).await {
                Ok(data) => Ok(data),
                Err(FetchError::Stale) => {
                    cache.invalidate(msg_id).await;
                    Err(StreamError::Stale)
                }
                Err(e) => Err(StreamError::Upstream(e.to_string())),
            }?;
            if data.is_empty() {
                break;
            }

            let emitted = slice_part(&data, part, &plan);
            if !emitted.is_empty() {
                yield emitted;
            }

            offset += data.len() as u64;
            part += 1;
        }

        log::debug!("{}: finished msg {msg_id}", client.name());
    }
}
