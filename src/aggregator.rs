use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::config::Config;
use crate::datasource::DataSource;
use crate::error::{AggregatorError, CorruptionError, ProgrammerError, StorageError};
use crate::metadata::SharedMetadata;
use crate::op::StorageOp;
use crate::storage::Storage;

/// Bytes moved and/or merged by a single [`SegmentAggregator::flush`] call.
///
/// `flushed_bytes` and `merged_bytes` each aggregate across every iteration
/// `flush` performed internally; a flush that both drains a run of appends
/// and completes a merge reports both.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushResult {
    pub flushed_bytes: u64,
    pub merged_bytes: u64,
}

impl FlushResult {
    fn add(&mut self, other: FlushResult) {
        self.flushed_bytes += other.flushed_bytes;
        self.merged_bytes += other.merged_bytes;
    }
}

/// Output of the flush planner: a contiguous byte buffer ready for a single
/// [`Storage::write`] call, plus how many queued operations it accounts for.
struct FlushPlan {
    bytes: Bytes,
    count: usize,
    total_length: u64,
}

/// The per-segment write-path aggregator.
///
/// Owns the pending operation queue for exactly one segment. Driven by a
/// single external caller that serializes `initialize`, `add`, `flush`, and
/// `close`; see the crate-level docs for the concurrency model this assumes.
pub struct SegmentAggregator<S, D> {
    storage: Arc<S>,
    data_source: Arc<D>,
    metadata: SharedMetadata,
    config: Config,

    operations: VecDeque<StorageOp>,
    outstanding_length: u64,
    last_added_offset: Option<u64>,
    merge_batch_count: u32,
    has_seal_pending: bool,
    last_flush_at: Instant,
    closed: bool,
}

impl<S, D> SegmentAggregator<S, D>
where
    S: Storage,
    D: DataSource,
{
    /// Create an aggregator for `metadata`'s segment. Must be followed by
    /// [`Self::initialize`] before `add` or `flush` can be called.
    pub fn new(storage: Arc<S>, data_source: Arc<D>, metadata: SharedMetadata, config: Config) -> Self {
        Self {
            storage,
            data_source,
            metadata,
            config,
            operations: VecDeque::new(),
            outstanding_length: 0,
            last_added_offset: None,
            merge_batch_count: 0,
            has_seal_pending: false,
            last_flush_at: Instant::now(),
            closed: false,
        }
    }

    /// Reconcile in-memory metadata with the storage tier and establish the
    /// offset the first `add`ed operation must start at.
    pub async fn initialize(&mut self, deadline: Instant) -> Result<(), AggregatorError> {
        self.ensure_not_closed()?;
        if self.last_added_offset.is_some() {
            return Err(ProgrammerError::AlreadyInitialized.into());
        }

        self.check_deadline(deadline)?;
        let name = self.segment_name();
        let info = self.storage.get_info(&name, deadline).await?;

        let (meta_storage_length, meta_sealed, segment_id) = {
            let meta = self.metadata.lock().unwrap();
            (meta.storage_length(), meta.sealed(), meta.id())
        };

        if info.length != meta_storage_length {
            tracing::warn!(
                segment = %segment_id,
                metadata_storage_length = meta_storage_length,
                storage_length = info.length,
                "storage/metadata length mismatch on init; adopting storage's length"
            );
            self.metadata.lock().unwrap().set_storage_length(info.length);
        }

        if info.sealed && !meta_sealed {
            tracing::error!(segment = %segment_id, "storage reports sealed but metadata does not; refusing to initialize");
            return Err(CorruptionError::SealedInStorageButNotInMetadata { segment: segment_id }.into());
        }

        self.last_added_offset = Some(info.length);
        tracing::debug!(segment = %segment_id, last_added_offset = info.length, "initialized");
        Ok(())
    }

    /// Validate and enqueue `op`. Synchronous: never suspends, never talks
    /// to storage. Checks segment routing, pending-seal state, offset
    /// contiguity, the durable log length bound, seal validity, and the
    /// per-append size cap, in that order.
    pub fn add(&mut self, op: StorageOp) -> Result<(), AggregatorError> {
        self.ensure_not_closed()?;
        let last_added_offset = self.last_added_offset.ok_or(ProgrammerError::NotInitialized)?;

        let (segment_id, is_standalone, durable_log_length, sealed) = {
            let meta = self.metadata.lock().unwrap();
            (meta.id(), meta.is_standalone(), meta.durable_log_length(), meta.sealed())
        };

        if op.is_merge() {
            if !is_standalone || op.segment_id() != segment_id {
                return Err(ProgrammerError::SegmentIdentityMismatch {
                    expected: segment_id,
                    actual: op.segment_id(),
                }
                .into());
            }
        } else if op.segment_id() != segment_id {
            return Err(ProgrammerError::SegmentIdentityMismatch {
                expected: segment_id,
                actual: op.segment_id(),
            }
            .into());
        }

        if self.has_seal_pending {
            return Err(CorruptionError::OperationAfterPendingSeal {
                seal_offset: last_added_offset,
            }
            .into());
        }

        let offset = op.offset();
        let length = op.length();

        if offset != last_added_offset {
            return Err(CorruptionError::OffsetGap {
                expected: last_added_offset,
                actual: offset,
            }
            .into());
        }

        if offset + length > durable_log_length {
            return Err(CorruptionError::BeyondDurableLogLength {
                offset,
                end: offset + length,
                durable_log_length,
            }
            .into());
        }

        if let StorageOp::Seal { .. } = op {
            if offset != durable_log_length || !sealed {
                return Err(CorruptionError::InvalidSeal {
                    offset,
                    durable_log_length,
                }
                .into());
            }
        } else if op.is_append() && length > self.config.max_flush_size_bytes {
            return Err(ProgrammerError::AppendExceedsMaxFlushSize {
                length,
                max: self.config.max_flush_size_bytes,
            }
            .into());
        }

        let is_merge = op.is_merge();
        let is_seal = op.is_seal();

        self.operations.push_back(op);
        self.last_added_offset = Some(offset + length);
        self.outstanding_length += length;
        if is_merge {
            self.merge_batch_count += 1;
        }
        if is_seal {
            self.has_seal_pending = true;
        }

        Ok(())
    }

    /// Whether a driver should call [`Self::flush`] right now.
    ///
    /// Pure function of current state; never suspends.
    pub fn must_flush(&self) -> bool {
        self.outstanding_length >= self.config.flush_threshold_bytes
            || self.elapsed_since_last_flush() >= self.config.flush_threshold_time
            || self.has_seal_pending
            || self.merge_batch_count > 0
    }

    /// Flush buffered operations to storage, then attempt one pending merge
    /// and one pending seal in that order.
    pub async fn flush(&mut self, deadline: Instant) -> Result<FlushResult, AggregatorError> {
        self.ensure_not_closed()?;

        let mut result = FlushResult::default();

        if self.has_seal_pending || self.merge_batch_count > 0 {
            while matches!(self.operations.front(), Some(op) if op.is_append()) {
                self.check_deadline(deadline)?;
                result.add(self.flush_once(deadline).await?);
            }
            if let Some(merge_result) = self.merge_if_necessary(deadline).await? {
                result.add(merge_result);
            }
            self.seal_if_necessary(deadline).await?;
        } else {
            loop {
                let threshold_exceeded = self.outstanding_length >= self.config.flush_threshold_bytes
                    || self.elapsed_since_last_flush() >= self.config.flush_threshold_time;
                if !threshold_exceeded {
                    break;
                }
                if !matches!(self.operations.front(), Some(op) if op.is_append()) {
                    break;
                }
                self.check_deadline(deadline)?;
                result.add(self.flush_once(deadline).await?);
            }
        }

        tracing::debug!(
            flushed_bytes = result.flushed_bytes,
            merged_bytes = result.merged_bytes,
            "flush complete"
        );
        Ok(result)
    }

    /// Whether `close` has been called, or a seal has completed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Offset of the head-of-queue entry, or `None` if the queue is empty:
    /// the lowest offset not yet acknowledged durable.
    pub fn lowest_uncommitted_offset(&self) -> Option<u64> {
        self.operations.front().map(StorageOp::offset)
    }

    /// Time elapsed since the most recent successful flush, or since
    /// `initialize`/`new` if none has happened yet.
    pub fn elapsed_since_last_flush(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_flush_at)
    }

    /// A clone of the shared metadata handle this aggregator mutates.
    pub fn metadata(&self) -> SharedMetadata {
        Arc::clone(&self.metadata)
    }

    /// Idempotently terminate the aggregator. No buffered data is discarded
    /// from metadata (metadata is externally owned); the operation queue is
    /// released.
    pub fn close(&mut self) {
        if self.closed {
            tracing::trace!("close: already closed");
            return;
        }
        self.closed = true;
        self.operations.clear();
        tracing::debug!("closed");
    }

    fn ensure_not_closed(&self) -> Result<(), AggregatorError> {
        if self.closed {
            Err(ProgrammerError::AlreadyClosed.into())
        } else {
            Ok(())
        }
    }

    fn check_deadline(&self, deadline: Instant) -> Result<(), AggregatorError> {
        if Instant::now() >= deadline {
            Err(StorageError::Timeout.into())
        } else {
            Ok(())
        }
    }

    fn segment_name(&self) -> String {
        self.metadata.lock().unwrap().name().to_string()
    }

    /// Accumulate contiguous append payloads from the head of the queue
    /// into a single bounded write.
    async fn plan_flush(&self, deadline: Instant) -> Result<FlushPlan, AggregatorError> {
        let mut buf = BytesMut::new();
        let mut count = 0usize;
        let mut total_length: u64 = 0;

        for op in self.operations.iter() {
            if !op.is_append() {
                break;
            }
            let length = op.length();
            if count > 0 && total_length + length > self.config.max_flush_size_bytes {
                break;
            }

            let payload = match op {
                StorageOp::Append { data, .. } => data.clone(),
                StorageOp::CachedAppend { cache_key, offset, .. } => {
                    self.check_deadline(deadline)?;
                    match self.data_source.get_append_data(cache_key).await? {
                        Some(bytes) => bytes,
                        None => {
                            return Err(CorruptionError::CacheMiss {
                                cache_key: cache_key.clone(),
                                offset: *offset,
                            }
                            .into())
                        }
                    }
                }
                _ => unreachable!("loop breaks above for non-append ops"),
            };

            buf.extend_from_slice(&payload);
            total_length += length;
            count += 1;
            tracing::trace!(count, total_length, "plan_flush: accumulated op");
        }

        Ok(FlushPlan {
            bytes: buf.freeze(),
            count,
            total_length,
        })
    }

    /// Plan and execute a single bounded write.
    async fn flush_once(&mut self, deadline: Instant) -> Result<FlushResult, AggregatorError> {
        let plan = self.plan_flush(deadline).await?;
        if plan.total_length == 0 {
            return Ok(FlushResult::default());
        }

        self.check_deadline(deadline)?;
        let (name, start_offset) = {
            let meta = self.metadata.lock().unwrap();
            (meta.name().to_string(), meta.storage_length())
        };

        self.storage.write(&name, start_offset, plan.bytes, deadline).await?;

        for _ in 0..plan.count {
            let popped = self.operations.pop_front().expect("flush plan overruns queue length");
            debug_assert!(popped.is_append(), "flush executor only pops appends");
        }

        {
            let mut meta = self.metadata.lock().unwrap();
            let new_len = meta.storage_length() + plan.total_length;
            meta.set_storage_length(new_len);
        }
        self.outstanding_length -= plan.total_length;
        self.last_flush_at = Instant::now();

        tracing::debug!(flushed_bytes = plan.total_length, ops = plan.count, "flush_once");
        Ok(FlushResult {
            flushed_bytes: plan.total_length,
            merged_bytes: 0,
        })
    }

    /// If this aggregator is stand-alone and the queue head is a
    /// `MergeBatch`, validate and execute the concat.
    ///
    /// Returns `Ok(None)` both when there is nothing to do and when the
    /// merge is deferred because the child is not yet drained -- neither is
    /// an error.
    async fn merge_if_necessary(&mut self, deadline: Instant) -> Result<Option<FlushResult>, AggregatorError> {
        let is_standalone = self.metadata.lock().unwrap().is_standalone();
        if !is_standalone {
            return Ok(None);
        }
        let child_id = match self.operations.front() {
            Some(StorageOp::MergeBatch { child_id, .. }) => *child_id,
            _ => return Ok(None),
        };

        self.check_deadline(deadline)?;
        let child_handle = self.data_source.get_segment_metadata(child_id).await?;
        let (child_deleted, child_sealed_in_storage, child_durable_log_length, child_storage_length, child_name) = {
            let child = child_handle.lock().unwrap();
            (
                child.deleted(),
                child.sealed_in_storage(),
                child.durable_log_length(),
                child.storage_length(),
                child.name().to_string(),
            )
        };

        if child_deleted {
            tracing::error!(child = %child_id, "merge target already deleted");
            return Err(CorruptionError::MergeTargetDeleted { child: child_id }.into());
        }

        if !child_sealed_in_storage || child_durable_log_length > child_storage_length {
            tracing::debug!(child = %child_id, "merge deferred: child not yet fully drained");
            return Ok(None);
        }

        self.check_deadline(deadline)?;
        let child_info = self.storage.get_info(&child_name, deadline).await?;
        if child_info.length != child_storage_length {
            tracing::error!(
                child = %child_id,
                storage_length = child_info.length,
                metadata_length = child_storage_length,
                "merge precondition violated"
            );
            return Err(CorruptionError::MergeLengthMismatch {
                child: child_id,
                storage_length: child_info.length,
                expected: child_storage_length,
            }
            .into());
        }

        let (parent_name, parent_storage_length) = {
            let meta = self.metadata.lock().unwrap();
            (meta.name().to_string(), meta.storage_length())
        };

        self.check_deadline(deadline)?;
        self.storage.concat(&parent_name, &child_name, deadline).await?;

        let expected_new_length = parent_storage_length + child_storage_length;
        self.check_deadline(deadline)?;
        let parent_info = self.storage.get_info(&parent_name, deadline).await?;
        if parent_info.length != expected_new_length {
            tracing::error!(
                expected = expected_new_length,
                actual = parent_info.length,
                "merge postcondition violated"
            );
            return Err(CorruptionError::MergePostconditionMismatch {
                expected: expected_new_length,
                actual: parent_info.length,
            }
            .into());
        }

        self.operations.pop_front();
        self.merge_batch_count -= 1;

        let parent_id = {
            let mut meta = self.metadata.lock().unwrap();
            meta.set_storage_length(parent_info.length);
            if parent_info.sealed {
                meta.mark_sealed();
                meta.mark_sealed_in_storage();
            }
            meta.id()
        };
        child_handle.lock().unwrap().mark_deleted();

        self.data_source.delete_segment(&child_name).await;
        self.data_source.complete_merge(parent_id, child_id).await;

        self.last_flush_at = Instant::now();
        tracing::info!(child = %child_id, merged_bytes = child_storage_length, "merge completed");
        Ok(Some(FlushResult {
            flushed_bytes: 0,
            merged_bytes: child_storage_length,
        }))
    }

    /// If a seal is pending and the queue head is the `Seal`, finalize the
    /// segment in storage and close the aggregator.
    async fn seal_if_necessary(&mut self, deadline: Instant) -> Result<(), AggregatorError> {
        if !self.has_seal_pending {
            return Ok(());
        }
        if !matches!(self.operations.front(), Some(StorageOp::Seal { .. })) {
            return Ok(());
        }

        self.check_deadline(deadline)?;
        let name = self.segment_name();
        self.storage.seal(&name, deadline).await?;

        self.metadata.lock().unwrap().mark_sealed_in_storage();
        self.operations.pop_front();
        debug_assert!(self.operations.is_empty(), "seal must be the last queued operation");
        self.has_seal_pending = false;
        self.closed = true;

        tracing::info!(segment = %name, "seal completed, aggregator closed");
        Ok(())
    }
}
