use std::fmt;
use std::sync::{Arc, Mutex};

/// Identifier of a segment, unique within a [`ContainerId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the container (the unit of placement/ownership) a segment
/// belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A handle to [`SegmentMetadata`] shared with other subsystems (the durable
/// log that owns `durable_log_length`/`sealed`, the container metadata
/// store, other aggregators resolving a merge target).
///
/// Plain [`Mutex`] rather than an async lock. Every critical section here is
/// pure bookkeeping, never an I/O wait. No lock is ever held across an
/// `.await`.
pub type SharedMetadata = Arc<Mutex<SegmentMetadata>>;

/// The externally-owned, per-segment metadata record.
///
/// Most fields are mutated by systems other than the
/// [`SegmentAggregator`](crate::SegmentAggregator): `durable_log_length` and
/// `sealed` are advanced by the durable log as it accepts operations. The
/// aggregator only ever mutates `storage_length`, `sealed_in_storage`, and
/// `deleted`, and `sealed` exactly once, on a corruption-free mismatch
/// discovered during [`initialize`](crate::SegmentAggregator::initialize).
/// Those mutators are crate-private: callers outside this crate only ever
/// see read accessors, which is the "narrow updater interface" the design
/// calls for without needing a second trait to express it.
#[derive(Debug)]
pub struct SegmentMetadata {
    id: SegmentId,
    container_id: ContainerId,
    name: String,
    parent_id: Option<SegmentId>,
    durable_log_length: u64,
    storage_length: u64,
    sealed: bool,
    sealed_in_storage: bool,
    deleted: bool,
}

impl SegmentMetadata {
    /// Create metadata for a freshly-registered segment. `parent_id` is
    /// `None` for a stand-alone segment, `Some` for a batch/child segment
    /// eligible to be merged into its parent.
    pub fn new(id: SegmentId, container_id: ContainerId, name: impl Into<String>, parent_id: Option<SegmentId>) -> Self {
        Self {
            id,
            container_id,
            name: name.into(),
            parent_id,
            durable_log_length: 0,
            storage_length: 0,
            sealed: false,
            sealed_in_storage: false,
            deleted: false,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_id(&self) -> Option<SegmentId> {
        self.parent_id
    }

    /// Whether this segment is stand-alone, i.e. not a merge-eligible child.
    pub fn is_standalone(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn durable_log_length(&self) -> u64 {
        self.durable_log_length
    }

    pub fn storage_length(&self) -> u64 {
        self.storage_length
    }

    pub fn sealed(&self) -> bool {
        self.sealed
    }

    pub fn sealed_in_storage(&self) -> bool {
        self.sealed_in_storage
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    /// Advance the durable log's high-water mark. Called by the durable log,
    /// never by the aggregator. `value` must be monotone non-decreasing;
    /// debug-asserted, not enforced in release builds, since a violation
    /// here is a bug in the log, not something this crate can recover from.
    pub fn set_durable_log_length(&mut self, value: u64) {
        debug_assert!(value >= self.durable_log_length, "durable_log_length must not regress");
        self.durable_log_length = value;
    }

    /// Record that the durable log has accepted a seal. Called by the
    /// durable log, never by the aggregator.
    pub fn set_sealed(&mut self, value: bool) {
        self.sealed = value;
    }

    pub(crate) fn set_storage_length(&mut self, value: u64) {
        self.storage_length = value;
    }

    /// Mark the segment sealed from the aggregator's side, e.g. when a
    /// completed merge's post-concat info reports the parent sealed.
    pub(crate) fn mark_sealed(&mut self) {
        self.sealed = true;
    }

    pub(crate) fn mark_sealed_in_storage(&mut self) {
        self.sealed_in_storage = true;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}
