//! Application-wide constants for streamgate.
//!
//! This module centralizes all magic numbers and configuration defaults
//! to improve maintainability and discoverability. Constants are grouped
//! by domain with documentation explaining their purpose.
//!
//! # Categories
//!
//! - **Chunking**: upstream fetch sizes and alignment
//! - **Retry**: retry budgets and backoff
//! - **Concurrency**: stream admission limits
//! - **Timeouts**: network and session lifecycle timers

use std::time::Duration;

// ============================================================================
// Chunking
// ============================================================================

/// Smallest chunk the upstream accepts for a single fetch.
///
/// The adaptive fetcher halves its request size on network failures and
/// never goes below this floor.
pub const MIN_CHUNK: u32 = 64 * 1024;

/// Largest chunk requested from the upstream in a single fetch.
///
/// Also the alignment unit for range plans. 512 KiB keeps per-call latency
/// low on slow links while amortizing round trips for sequential playback.
pub const MAX_CHUNK: u32 = 512 * 1024;

/// Initial fetch size for thumbnail locations.
///
/// Thumbnails are small; starting at half the document size avoids
/// over-requesting.
pub const THUMB_CHUNK: u32 = 256 * 1024;

// ============================================================================
// Retry
// ============================================================================

/// Attempts per chunk fetch before the stream is abandoned.
///
/// Rate-limit waits requested by the upstream do not count against this
/// budget.
pub const MAX_RETRIES: u32 = 6;

/// Base for the exponential backoff between fetch retries.
///
/// Attempt `n` sleeps `BACKOFF_BASE_SECS^n` seconds (2, 4, 8, ...).
pub const BACKOFF_BASE_SECS: u64 = 2;

/// How many times the authorization import is retried over freshly
/// re-exported credentials when a foreign-datacenter session rejects them.
pub const AUTH_IMPORT_RETRIES: u32 = 6;

// ============================================================================
// Concurrency
// ============================================================================

/// Concurrent chunk fetches admitted per upstream datacenter.
pub const MAX_STREAMS_PER_DC: usize = 2;

/// Total concurrent streams across all client identities.
pub const GLOBAL_STREAM_LIMIT: usize = 10;

// ============================================================================
// Timeouts
// ============================================================================

/// TCP connect timeout for new upstream sessions.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-chunk read budget.
///
/// Covers a worst-case 512 KiB chunk over a slow link; exceeding it is
/// treated as a network failure and retried.
pub const CHUNK_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// A session untouched for this long is closed by the idle reaper.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the idle reaper scans the session pool.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// How often the cached file properties are flushed in full.
pub const CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Interval between keepalive pings on each identity's home session.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);
