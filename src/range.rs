//! Range header parsing and chunk-aligned fetch planning.
//!
//! A request's byte range is mapped onto aligned upstream chunks once, up
//! front. The resulting [`RangePlan`] is immutable; the stream driver only
//! walks it. Head and tail cuts carry the sub-chunk offsets so the emitted
//! body is byte-exact regardless of alignment.

/// The requested range cannot be satisfied against this file.
///
/// Covers malformed headers as well as out-of-bounds ranges; both map to
/// `416 Range Not Satisfiable` with a `bytes */<size>` content range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsatisfiable;

impl std::fmt::Display for Unsatisfiable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "range not satisfiable")
    }
}

impl std::error::Error for Unsatisfiable {}

/// Chunk-aligned plan for one streamed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlan {
    /// First requested byte (inclusive).
    pub start: u64,
    /// Last requested byte (inclusive).
    pub end: u64,
    /// Aligned fetch size.
    pub chunk_size: u64,
    /// Offset of the first aligned chunk covering the range.
    pub offset_base: u64,
    /// Bytes to drop from the front of the first chunk.
    pub first_cut: usize,
    /// Bytes to keep from the front of the last chunk.
    pub last_cut: usize,
    /// Number of aligned chunks the range spans.
    pub part_count: u64,
}

impl RangePlan {
    /// Build the plan for an already-validated `[start, end]` range.
    pub fn new(start: u64, end: u64, chunk_size: u64) -> Self {
        debug_assert!(start <= end);
        debug_assert!(chunk_size >= 1024 && chunk_size % 1024 == 0);

        let offset_base = start - (start % chunk_size);
        let first_cut = (start - offset_base) as usize;
        let last_cut = (end % chunk_size + 1) as usize;
        let part_count = (end + 1).div_ceil(chunk_size) - offset_base / chunk_size;

        Self {
            start,
            end,
            chunk_size,
            offset_base,
            first_cut,
            last_cut,
            part_count,
        }
    }

    /// Exact length of the response body.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Resolve a request's `Range` header against the file size.
///
/// `bytes=<s>-<e>` selects `[s, e]`; `bytes=<s>-` selects `[s, size-1]`;
/// a missing header selects the full file.
///
/// # Errors
///
/// Returns [`Unsatisfiable`] for malformed headers and for ranges with
/// `end < start` or `end >= size`.
pub fn resolve(header: Option<&str>, file_size: u64) -> Result<(u64, u64), Unsatisfiable> {
    let (start, end) = match header {
        None => (0, file_size.checked_sub(1).ok_or(Unsatisfiable)?),
        Some(raw) => {
            let spec = raw.trim().strip_prefix("bytes=").ok_or(Unsatisfiable)?;
            let (from, until) = spec.split_once('-').ok_or(Unsatisfiable)?;
            let start: u64 = from.trim().parse().map_err(|_| Unsatisfiable)?;
            let end = if until.trim().is_empty() {
                file_size.checked_sub(1).ok_or(Unsatisfiable)?
            } else {
                until.trim().parse().map_err(|_| Unsatisfiable)?
            };
            (start, end)
        }
    };

    if end < start || end >= file_size {
        return Err(Unsatisfiable);
    }
    Ok((start, end))
}
