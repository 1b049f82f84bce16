use bytes::Bytes;

use crate::metadata::SegmentId;

/// A single operation consumed from the durable log, destined for this
/// segment's storage tier.
///
/// Every variant carries the `segment_id` the log routed it to, so the
/// validator can catch a caller-routing bug before it ever touches the
/// queue or storage. Dispatch throughout the validator and
/// flush planner is by tag, the natural representation for this small,
/// closed set of operation kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum StorageOp {
    /// A plain append whose payload is carried inline.
    Append {
        segment_id: SegmentId,
        offset: u64,
        length: u64,
        data: Bytes,
    },
    /// An append whose payload must be resolved from the append-data cache
    /// via [`DataSource::get_append_data`](crate::DataSource::get_append_data).
    /// A cache miss at flush time is data corruption, not a retryable
    /// condition: the cache is expected to hold the payload for as long as
    /// the operation sits unflushed in the queue.
    CachedAppend {
        segment_id: SegmentId,
        offset: u64,
        length: u64,
        cache_key: String,
    },
    /// Concatenate `child_id`, a sealed child segment, onto `segment_id`
    /// (which must be stand-alone) at `target_offset`. Contributes zero
    /// bytes to `outstanding_length`; the bytes actually written are
    /// accounted against the child.
    MergeBatch {
        segment_id: SegmentId,
        target_offset: u64,
        child_id: SegmentId,
    },
    /// Finalize the segment. Must be the last operation ever added; no
    /// further operations are accepted once one is queued.
    Seal { segment_id: SegmentId, offset: u64 },
}

impl StorageOp {
    /// The segment this operation was routed to by the caller.
    pub fn segment_id(&self) -> SegmentId {
        match self {
            StorageOp::Append { segment_id, .. } => *segment_id,
            StorageOp::CachedAppend { segment_id, .. } => *segment_id,
            StorageOp::MergeBatch { segment_id, .. } => *segment_id,
            StorageOp::Seal { segment_id, .. } => *segment_id,
        }
    }

    /// The offset this operation starts at within the segment.
    pub fn offset(&self) -> u64 {
        match self {
            StorageOp::Append { offset, .. } => *offset,
            StorageOp::CachedAppend { offset, .. } => *offset,
            StorageOp::MergeBatch { target_offset, .. } => *target_offset,
            StorageOp::Seal { offset, .. } => *offset,
        }
    }

    /// The number of bytes this operation occupies in the offset space.
    /// `MergeBatch` and `Seal` occupy zero: the former's bytes are
    /// accounted against the child segment, the latter carries no payload.
    pub fn length(&self) -> u64 {
        match self {
            StorageOp::Append { length, .. } => *length,
            StorageOp::CachedAppend { length, .. } => *length,
            StorageOp::MergeBatch { .. } | StorageOp::Seal { .. } => 0,
        }
    }

    /// Whether this operation is an append kind the flush planner can
    /// batch into a single storage write.
    pub fn is_append(&self) -> bool {
        matches!(self, StorageOp::Append { .. } | StorageOp::CachedAppend { .. })
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, StorageOp::MergeBatch { .. })
    }

    pub fn is_seal(&self) -> bool {
        matches!(self, StorageOp::Seal { .. })
    }
}
