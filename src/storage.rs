use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::error::StorageError;

/// What the storage tier reports about a segment, in response to
/// [`Storage::get_info`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Bytes durably written for this segment, as far as storage knows.
    pub length: u64,
    /// Whether storage has acknowledged a seal of this segment.
    pub sealed: bool,
}

/// The narrow contract the write path needs from the backing object-style
/// storage tier.
///
/// Implementations are shared across many [`SegmentAggregator`](crate::SegmentAggregator)
/// instances and must support concurrent calls from independent
/// single-threaded owners; hence `Send + Sync`. This crate ships no
/// filesystem or network implementation of its own -- see
/// [`crate::testing`] for an in-memory fake usable in tests.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Current length and seal state of the named segment.
    async fn get_info(&self, name: &str, deadline: Instant) -> Result<SegmentInfo, StorageError>;

    /// Append `bytes` to the named segment at `offset`.
    ///
    /// Implementations must fail rather than silently reorder if `offset`
    /// does not match the segment's current length: this is an append-only
    /// tier, not a random-access one.
    async fn write(&self, name: &str, offset: u64, bytes: Bytes, deadline: Instant) -> Result<(), StorageError>;

    /// Append the full contents of `child` onto `parent` at `parent`'s
    /// current tail, then remove `child`. Atomic from the caller's
    /// perspective: either the whole of `child` lands on `parent`, or
    /// nothing does.
    async fn concat(&self, parent: &str, child: &str, deadline: Instant) -> Result<(), StorageError>;

    /// Mark the named segment sealed. Idempotent: sealing an
    /// already-sealed segment succeeds.
    async fn seal(&self, name: &str, deadline: Instant) -> Result<(), StorageError>;
}
