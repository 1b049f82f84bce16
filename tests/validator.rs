//! Focused coverage of the validator's precondition checks, the threshold
//! policy's time-based trigger, and `close`/`is_closed` outside of a seal,
//! complementing the broader end-to-end scenarios in `tests/scenarios.rs`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use segment_aggregator::testing::{MemoryDataSource, MemoryStorage};
use segment_aggregator::{Config, ContainerId, SegmentAggregator, SegmentId, SegmentMetadata, StorageOp};
use tokio::time::Instant;

const CONTAINER: &str = "container-a";
const PARENT_NAME: &str = "segment-1";

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

fn new_metadata(id: u64, name: &str, parent_id: Option<SegmentId>) -> Arc<Mutex<SegmentMetadata>> {
    Arc::new(Mutex::new(SegmentMetadata::new(
        SegmentId(id),
        ContainerId(CONTAINER.to_string()),
        name,
        parent_id,
    )))
}

async fn new_aggregator(
    storage: Arc<MemoryStorage>,
    data_source: Arc<MemoryDataSource>,
    metadata: Arc<Mutex<SegmentMetadata>>,
    config: Config,
) -> SegmentAggregator<MemoryStorage, MemoryDataSource> {
    let mut agg = SegmentAggregator::new(storage, data_source, metadata, config);
    agg.initialize(deadline()).await.expect("initialize");
    agg
}

#[tokio::test]
async fn add_before_initialize_is_programmer_error() {
    let storage = Arc::new(MemoryStorage::new());
    storage.create(PARENT_NAME, Vec::new(), false);
    let data_source = Arc::new(MemoryDataSource::new(ContainerId(CONTAINER.to_string())));
    let metadata = new_metadata(1, PARENT_NAME, None);

    let mut agg = SegmentAggregator::new(storage, data_source, metadata, Config::default());
    let err = agg
        .add(StorageOp::Append {
            segment_id: SegmentId(1),
            offset: 0,
            length: 1,
            data: Bytes::from(vec![0u8]),
        })
        .unwrap_err();
    assert!(err.is_programmer());
}

#[tokio::test]
async fn initialize_twice_is_programmer_error() {
    let storage = Arc::new(MemoryStorage::new());
    storage.create(PARENT_NAME, Vec::new(), false);
    let data_source = Arc::new(MemoryDataSource::new(ContainerId(CONTAINER.to_string())));
    let metadata = new_metadata(1, PARENT_NAME, None);

    let mut agg = new_aggregator(storage, data_source, metadata, Config::default()).await;
    let err = agg.initialize(deadline()).await.unwrap_err();
    assert!(err.is_programmer());
}

#[tokio::test]
async fn add_wrong_segment_id_is_programmer_error() {
    let storage = Arc::new(MemoryStorage::new());
    storage.create(PARENT_NAME, Vec::new(), false);
    let data_source = Arc::new(MemoryDataSource::new(ContainerId(CONTAINER.to_string())));
    let metadata = new_metadata(1, PARENT_NAME, None);
    metadata.lock().unwrap().set_durable_log_length(10);

    let mut agg = new_aggregator(storage, data_source, metadata, Config::default()).await;
    let err = agg
        .add(StorageOp::Append {
            segment_id: SegmentId(999),
            offset: 0,
            length: 10,
            data: Bytes::from(vec![0u8; 10]),
        })
        .unwrap_err();
    assert!(err.is_programmer());
}

#[tokio::test]
async fn op_after_pending_seal_is_corruption() {
    let storage = Arc::new(MemoryStorage::new());
    storage.create(PARENT_NAME, Vec::new(), false);
    let data_source = Arc::new(MemoryDataSource::new(ContainerId(CONTAINER.to_string())));
    let metadata = new_metadata(1, PARENT_NAME, None);
    {
        let mut meta = metadata.lock().unwrap();
        meta.set_durable_log_length(10);
        meta.set_sealed(true);
    }

    let mut agg = new_aggregator(storage, data_source, metadata, Config::default()).await;
    agg.add(StorageOp::Append {
        segment_id: SegmentId(1),
        offset: 0,
        length: 10,
        data: Bytes::from(vec![0u8; 10]),
    })
    .unwrap();
    agg.add(StorageOp::Seal {
        segment_id: SegmentId(1),
        offset: 10,
    })
    .unwrap();

    let err = agg
        .add(StorageOp::Append {
            segment_id: SegmentId(1),
            offset: 10,
            length: 1,
            data: Bytes::from(vec![0u8]),
        })
        .unwrap_err();
    assert!(err.is_corruption());
}

#[tokio::test]
async fn append_beyond_durable_log_length_is_corruption() {
    let storage = Arc::new(MemoryStorage::new());
    storage.create(PARENT_NAME, Vec::new(), false);
    let data_source = Arc::new(MemoryDataSource::new(ContainerId(CONTAINER.to_string())));
    let metadata = new_metadata(1, PARENT_NAME, None);
    metadata.lock().unwrap().set_durable_log_length(5);

    let mut agg = new_aggregator(storage, data_source, metadata, Config::default()).await;
    let err = agg
        .add(StorageOp::Append {
            segment_id: SegmentId(1),
            offset: 0,
            length: 10,
            data: Bytes::from(vec![0u8; 10]),
        })
        .unwrap_err();
    assert!(err.is_corruption());
}

#[tokio::test]
async fn seal_offset_not_matching_durable_log_length_is_corruption() {
    let storage = Arc::new(MemoryStorage::new());
    storage.create(PARENT_NAME, Vec::new(), false);
    let data_source = Arc::new(MemoryDataSource::new(ContainerId(CONTAINER.to_string())));
    let metadata = new_metadata(1, PARENT_NAME, None);
    {
        let mut meta = metadata.lock().unwrap();
        meta.set_durable_log_length(10);
        meta.set_sealed(true);
    }

    let mut agg = new_aggregator(storage, data_source, metadata, Config::default()).await;
    // Queue is still empty, so the contiguity check accepts offset 0, but
    // durable_log_length is 10: the seal offset does not match it.
    let err = agg
        .add(StorageOp::Seal {
            segment_id: SegmentId(1),
            offset: 0,
        })
        .unwrap_err();
    assert!(err.is_corruption());
}

#[tokio::test]
async fn merge_target_already_deleted_is_corruption() {
    let storage = Arc::new(MemoryStorage::new());
    storage.create("segment-parent-1", Vec::new(), false);
    storage.create("segment-child", Vec::new(), false);
    storage.create("segment-parent-2", Vec::new(), false);
    let data_source = Arc::new(MemoryDataSource::new(ContainerId(CONTAINER.to_string())));

    // Drain and seal the child, then merge it once into parent 1 so the
    // child ends up genuinely deleted, the same way a real child segment
    // would be retired.
    let child_metadata = new_metadata(2, "segment-child", Some(SegmentId(1)));
    {
        let mut child = child_metadata.lock().unwrap();
        child.set_durable_log_length(20);
        child.set_sealed(true);
    }
    let mut child_agg = new_aggregator(
        storage.clone(),
        data_source.clone(),
        child_metadata.clone(),
        Config::default().with_flush_threshold_bytes(1),
    )
    .await;
    child_agg
        .add(StorageOp::Append {
            segment_id: SegmentId(2),
            offset: 0,
            length: 20,
            data: Bytes::from(vec![1u8; 20]),
        })
        .unwrap();
    child_agg
        .add(StorageOp::Seal {
            segment_id: SegmentId(2),
            offset: 20,
        })
        .unwrap();
    child_agg.flush(deadline()).await.unwrap();

    data_source.register_segment(SegmentId(2), child_metadata.clone());

    let parent1_metadata = new_metadata(1, "segment-parent-1", None);
    let mut parent1_agg = new_aggregator(
        storage.clone(),
        data_source.clone(),
        parent1_metadata,
        Config::default().with_flush_threshold_bytes(1),
    )
    .await;
    parent1_agg
        .add(StorageOp::MergeBatch {
            segment_id: SegmentId(1),
            target_offset: 0,
            child_id: SegmentId(2),
        })
        .unwrap();
    parent1_agg.flush(deadline()).await.unwrap();
    assert!(child_metadata.lock().unwrap().deleted());

    // A second parent now tries to merge the same, already-deleted child.
    let parent2_metadata = new_metadata(3, "segment-parent-2", None);
    let mut parent2_agg = new_aggregator(
        storage.clone(),
        data_source.clone(),
        parent2_metadata,
        Config::default().with_flush_threshold_bytes(1),
    )
    .await;
    parent2_agg
        .add(StorageOp::MergeBatch {
            segment_id: SegmentId(3),
            target_offset: 0,
            child_id: SegmentId(2),
        })
        .unwrap();
    let err = parent2_agg.flush(deadline()).await.unwrap_err();
    assert!(err.is_corruption());
}

#[tokio::test]
async fn merge_postcondition_mismatch_is_corruption() {
    let storage = Arc::new(MemoryStorage::new());
    storage.create(PARENT_NAME, Vec::new(), false);
    storage.create("segment-child", Vec::new(), false);
    let data_source = Arc::new(MemoryDataSource::new(ContainerId(CONTAINER.to_string())));

    let child_metadata = new_metadata(2, "segment-child", Some(SegmentId(1)));
    {
        let mut child = child_metadata.lock().unwrap();
        child.set_durable_log_length(50);
        child.set_sealed(true);
    }
    let mut child_agg = new_aggregator(
        storage.clone(),
        data_source.clone(),
        child_metadata.clone(),
        Config::default().with_flush_threshold_bytes(1),
    )
    .await;
    child_agg
        .add(StorageOp::Append {
            segment_id: SegmentId(2),
            offset: 0,
            length: 50,
            data: Bytes::from(vec![9u8; 50]),
        })
        .unwrap();
    child_agg
        .add(StorageOp::Seal {
            segment_id: SegmentId(2),
            offset: 50,
        })
        .unwrap();
    child_agg.flush(deadline()).await.unwrap();
    data_source.register_segment(SegmentId(2), child_metadata.clone());

    let parent_metadata = new_metadata(1, PARENT_NAME, None);
    let mut agg = new_aggregator(
        storage.clone(),
        data_source.clone(),
        parent_metadata.clone(),
        Config::default().with_flush_threshold_bytes(1),
    )
    .await;

    // Simulate storage drifting out from under the parent's metadata after
    // initialize: metadata still believes storage_length is 0, but the
    // backend's segment now actually holds 999 bytes. The post-concat
    // length storage reports will then disagree with what the metadata
    // expected.
    storage.create(PARENT_NAME, vec![7u8; 999], false);

    agg.add(StorageOp::MergeBatch {
        segment_id: SegmentId(1),
        target_offset: 0,
        child_id: SegmentId(2),
    })
    .unwrap();

    let err = agg.flush(deadline()).await.unwrap_err();
    assert!(err.is_corruption());
    // The parent's recorded storage_length must not have been advanced on
    // a failed postcondition check.
    assert_eq!(parent_metadata.lock().unwrap().storage_length(), 0);
}

#[tokio::test]
async fn must_flush_triggers_purely_on_elapsed_time() {
    tokio::time::pause();

    let storage = Arc::new(MemoryStorage::new());
    storage.create(PARENT_NAME, Vec::new(), false);
    let data_source = Arc::new(MemoryDataSource::new(ContainerId(CONTAINER.to_string())));
    let metadata = new_metadata(1, PARENT_NAME, None);

    let config = Config::default()
        .with_flush_threshold_bytes(u64::MAX)
        .with_flush_threshold_time(Duration::from_millis(10));
    let agg = new_aggregator(storage, data_source, metadata, config).await;

    assert!(!agg.must_flush());
    tokio::time::advance(Duration::from_millis(11)).await;
    assert!(agg.must_flush());
}

#[tokio::test]
async fn close_is_idempotent_and_rejects_further_calls() {
    let storage = Arc::new(MemoryStorage::new());
    storage.create(PARENT_NAME, Vec::new(), false);
    let data_source = Arc::new(MemoryDataSource::new(ContainerId(CONTAINER.to_string())));
    let metadata = new_metadata(1, PARENT_NAME, None);
    metadata.lock().unwrap().set_durable_log_length(10);

    let mut agg = new_aggregator(storage, data_source, metadata, Config::default()).await;
    agg.add(StorageOp::Append {
        segment_id: SegmentId(1),
        offset: 0,
        length: 10,
        data: Bytes::from(vec![0u8; 10]),
    })
    .unwrap();
    assert!(!agg.is_closed());
    assert_eq!(agg.lowest_uncommitted_offset(), Some(0));

    agg.close();
    assert!(agg.is_closed());
    assert_eq!(agg.lowest_uncommitted_offset(), None);

    // Idempotent: calling close again is a no-op, not an error.
    agg.close();
    assert!(agg.is_closed());

    let add_err = agg
        .add(StorageOp::Append {
            segment_id: SegmentId(1),
            offset: 10,
            length: 1,
            data: Bytes::from(vec![0u8]),
        })
        .unwrap_err();
    assert!(add_err.is_programmer());

    let flush_err = agg.flush(deadline()).await.unwrap_err();
    assert!(flush_err.is_programmer());
}
