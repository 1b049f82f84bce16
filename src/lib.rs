#![allow(unused)]

//! The per-segment write path of a log-structured stream store.
//!
//! A [`SegmentAggregator`] owns the pending, in-memory operation queue for a
//! single segment. An external driver pushes ordered operations in with
//! [`SegmentAggregator::add`] and periodically calls
//! [`SegmentAggregator::flush`] to durably write them to a backing
//! [`Storage`] tier, validating contiguity and cross-checking against the
//! storage tier's own view of the segment as it goes.
//!
//! This crate does not schedule flushes, persist its own state, or provide a
//! read path: it is a narrow write-side aggregator, meant to be driven by
//! something else (a durable log implementation, a container process, a
//! test harness).

mod aggregator;
mod config;
mod datasource;
mod error;
mod metadata;
mod op;
mod storage;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use aggregator::{FlushResult, SegmentAggregator};
pub use config::Config;
pub use datasource::DataSource;
pub use error::{AggregatorError, CorruptionError, ProgrammerError, StorageError};
pub use metadata::{ContainerId, SegmentId, SegmentMetadata, SharedMetadata};
pub use op::StorageOp;
pub use storage::{SegmentInfo, Storage};
