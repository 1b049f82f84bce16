//! In-memory [`Storage`] and [`DataSource`] fakes.
//!
//! Gated behind the `test-support` feature (and always available to this
//! crate's own `#[cfg(test)]` modules): a lock-protected in-process
//! stand-in for a real backend, good enough to drive the full aggregator
//! state machine without a network or a filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::datasource::DataSource;
use crate::error::StorageError;
use crate::metadata::{ContainerId, SegmentId, SharedMetadata};
use crate::storage::{SegmentInfo, Storage};

#[derive(Default)]
struct Segment {
    bytes: Vec<u8>,
    sealed: bool,
}

/// An in-memory [`Storage`] backed by a map of named byte buffers.
///
/// Segments must be registered with [`MemoryStorage::create`] before they
/// can be written, mirroring how a real backend requires the container to
/// have provisioned the segment before the aggregator ever touches it.
#[derive(Default)]
pub struct MemoryStorage {
    segments: Mutex<HashMap<String, Segment>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a segment with the given initial contents and seal state.
    pub fn create(&self, name: impl Into<String>, bytes: Vec<u8>, sealed: bool) {
        self.segments.lock().unwrap().insert(name.into(), Segment { bytes, sealed });
    }

    /// Current contents of `name`, for test assertions. Panics if the
    /// segment does not exist, since that is always a test setup bug.
    pub fn contents(&self, name: &str) -> Vec<u8> {
        self.segments.lock().unwrap().get(name).expect("segment not created").bytes.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_info(&self, name: &str, _deadline: Instant) -> Result<SegmentInfo, StorageError> {
        let segments = self.segments.lock().unwrap();
        let segment = segments
            .get(name)
            .ok_or_else(|| StorageError::backend(NotFound(name.to_string())))?;
        Ok(SegmentInfo {
            length: segment.bytes.len() as u64,
            sealed: segment.sealed,
        })
    }

    async fn write(&self, name: &str, offset: u64, bytes: Bytes, _deadline: Instant) -> Result<(), StorageError> {
        let mut segments = self.segments.lock().unwrap();
        let segment = segments
            .get_mut(name)
            .ok_or_else(|| StorageError::backend(NotFound(name.to_string())))?;
        if offset != segment.bytes.len() as u64 {
            return Err(StorageError::backend(OffsetMismatch {
                name: name.to_string(),
                expected: segment.bytes.len() as u64,
                actual: offset,
            }));
        }
        segment.bytes.extend_from_slice(&bytes);
        Ok(())
    }

    async fn concat(&self, parent: &str, child: &str, _deadline: Instant) -> Result<(), StorageError> {
        let mut segments = self.segments.lock().unwrap();
        let child_bytes = segments
            .get(child)
            .ok_or_else(|| StorageError::backend(NotFound(child.to_string())))?
            .bytes
            .clone();
        let parent_segment = segments
            .get_mut(parent)
            .ok_or_else(|| StorageError::backend(NotFound(parent.to_string())))?;
        parent_segment.bytes.extend_from_slice(&child_bytes);
        segments.remove(child);
        Ok(())
    }

    async fn seal(&self, name: &str, _deadline: Instant) -> Result<(), StorageError> {
        let mut segments = self.segments.lock().unwrap();
        let segment = segments
            .get_mut(name)
            .ok_or_else(|| StorageError::backend(NotFound(name.to_string())))?;
        segment.sealed = true;
        Ok(())
    }
}

/// An in-memory [`DataSource`]: an append-data cache plus a registry of
/// [`SharedMetadata`] handles for merge resolution.
pub struct MemoryDataSource {
    container_id: ContainerId,
    cache: Mutex<HashMap<String, Bytes>>,
    segments: Mutex<HashMap<SegmentId, SharedMetadata>>,
    deleted: Mutex<Vec<String>>,
    completed_merges: Mutex<Vec<(SegmentId, SegmentId)>>,
}

impl MemoryDataSource {
    pub fn new(container_id: ContainerId) -> Self {
        Self {
            container_id,
            cache: Mutex::new(HashMap::new()),
            segments: Mutex::new(HashMap::new()),
            deleted: Mutex::new(Vec::new()),
            completed_merges: Mutex::new(Vec::new()),
        }
    }

    pub fn put_append_data(&self, cache_key: impl Into<String>, data: Bytes) {
        self.cache.lock().unwrap().insert(cache_key.into(), data);
    }

    pub fn register_segment(&self, id: SegmentId, metadata: SharedMetadata) {
        self.segments.lock().unwrap().insert(id, metadata);
    }

    /// Names the data source was told to delete, in call order.
    pub fn deleted_segments(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// `(parent_id, child_id)` pairs reported complete, in call order.
    pub fn completed_merges(&self) -> Vec<(SegmentId, SegmentId)> {
        self.completed_merges.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    async fn get_append_data(&self, cache_key: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.cache.lock().unwrap().get(cache_key).cloned())
    }

    async fn get_segment_metadata(&self, segment_id: SegmentId) -> Result<SharedMetadata, StorageError> {
        self.segments
            .lock()
            .unwrap()
            .get(&segment_id)
            .cloned()
            .ok_or_else(|| StorageError::backend(NotFound(segment_id.to_string())))
    }

    async fn delete_segment(&self, name: &str) {
        self.deleted.lock().unwrap().push(name.to_string());
    }

    async fn complete_merge(&self, parent_id: SegmentId, child_id: SegmentId) {
        self.completed_merges.lock().unwrap().push((parent_id, child_id));
    }
}

#[derive(Debug, thiserror::Error)]
#[error("not found: {0}")]
struct NotFound(String);

#[derive(Debug, thiserror::Error)]
#[error("append at offset {actual} does not match current length {expected} of segment {name}")]
struct OffsetMismatch {
    name: String,
    expected: u64,
    actual: u64,
}
