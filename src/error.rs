use thiserror::Error;

use crate::metadata::SegmentId;

/// Contract violation by the caller of a [`SegmentAggregator`](crate::SegmentAggregator)
/// entry point.
///
/// These are fatal: the aggregator's state is undefined afterward and the
/// driver should drop it rather than retry. They never result from anything
/// observed in storage or in the operation stream itself -- only from the
/// driver calling an entry point it should not have.
#[derive(Debug, Error)]
pub enum ProgrammerError {
    #[error("aggregator is already closed")]
    AlreadyClosed,
    #[error("aggregator has already been initialized")]
    AlreadyInitialized,
    #[error("aggregator has not been initialized")]
    NotInitialized,
    #[error("operation routed to the wrong segment: expected {expected}, got {actual}")]
    SegmentIdentityMismatch { expected: SegmentId, actual: SegmentId },
    #[error("append of {length} bytes exceeds max_flush_size_bytes ({max})")]
    AppendExceedsMaxFlushSize { length: u64, max: u64 },
}

/// An observable inconsistency between in-memory metadata, the storage tier,
/// and the operation stream.
///
/// Corruption is never recovered from inline: the expected driver response
/// is to halt the owning container and surface the error for operator
/// investigation.
#[derive(Debug, Error)]
pub enum CorruptionError {
    #[error("operation queued after a pending seal at offset {seal_offset}")]
    OperationAfterPendingSeal { seal_offset: u64 },
    #[error("offset gap: expected {expected}, got {actual}")]
    OffsetGap { expected: u64, actual: u64 },
    #[error("operation [{offset}, {end}) exceeds durable_log_length {durable_log_length}")]
    BeyondDurableLogLength {
        offset: u64,
        end: u64,
        durable_log_length: u64,
    },
    #[error("seal at offset {offset} does not match durable_log_length {durable_log_length}, or the segment is not marked sealed")]
    InvalidSeal { offset: u64, durable_log_length: u64 },
    #[error("cache miss for append cache key {cache_key:?} at offset {offset}")]
    CacheMiss { cache_key: String, offset: u64 },
    #[error("storage reports segment {segment} sealed, but metadata does not")]
    SealedInStorageButNotInMetadata { segment: SegmentId },
    #[error("merge target {child} is already deleted")]
    MergeTargetDeleted { child: SegmentId },
    #[error("merge precondition violated for child {child}: storage reports length {storage_length}, metadata expects {expected}")]
    MergeLengthMismatch {
        child: SegmentId,
        storage_length: u64,
        expected: u64,
    },
    #[error("merge postcondition violated: expected parent length {expected} after concat, storage reports {actual}")]
    MergePostconditionMismatch { expected: u64, actual: u64 },
}

/// A transient failure talking to the storage tier, or a deadline expiring
/// before an attempt could be made.
///
/// Unlike [`CorruptionError`], these never mutate the aggregator's queue or
/// metadata, so the same `flush` call may simply be retried.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("flush deadline elapsed before the operation could be attempted")]
    Timeout,
    #[error("storage backend error")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// The union of everything a [`SegmentAggregator`](crate::SegmentAggregator)
/// entry point can fail with.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error(transparent)]
    Programmer(#[from] ProgrammerError),
    #[error(transparent)]
    Corruption(#[from] CorruptionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AggregatorError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, AggregatorError::Corruption(_))
    }

    pub fn is_programmer(&self) -> bool {
        matches!(self, AggregatorError::Programmer(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, AggregatorError::Storage(_))
    }
}
