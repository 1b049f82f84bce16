use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;
use crate::metadata::{ContainerId, SegmentId, SharedMetadata};

/// The collaborators the aggregator needs beyond the storage tier itself:
/// the append-data cache, the container-wide metadata store, and merge
/// notifications to other subsystems.
///
/// Like [`Storage`](crate::Storage), implementations are shared across many
/// aggregators and must be safe to call concurrently.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// The container this data source, and therefore every segment it
    /// resolves, belongs to.
    fn container_id(&self) -> &ContainerId;

    /// Fetch the payload previously cached under `cache_key` for a
    /// [`StorageOp::CachedAppend`](crate::StorageOp::CachedAppend).
    ///
    /// Returns `Ok(None)` on a genuine cache miss; the caller (the flush
    /// planner) is responsible for treating that as corruption, not this
    /// trait.
    async fn get_append_data(&self, cache_key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Resolve the shared metadata handle for `segment_id`, e.g. to inspect
    /// a merge target's drain state.
    async fn get_segment_metadata(&self, segment_id: SegmentId) -> Result<SharedMetadata, StorageError>;

    /// Best-effort notification that `name` has been retired after a
    /// completed merge. Failures are the data source's concern to log and
    /// retry; neither `delete_segment` nor `complete_merge` has an error
    /// path back into the aggregator.
    async fn delete_segment(&self, name: &str);

    /// Best-effort notification that `child_id` has been merged into
    /// `parent_id`, so other subsystems (directory, placement) can update
    /// their view.
    async fn complete_merge(&self, parent_id: SegmentId, child_id: SegmentId);
}
