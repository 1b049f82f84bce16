use std::time::Duration;

/// [`SegmentAggregator`](crate::SegmentAggregator) options.
///
/// Supplied by the driver; the aggregator never reads configuration from the
/// environment or a file itself (that is the driver's concern).
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Minimum number of outstanding appended bytes that forces a flush.
    ///
    /// Default: 1 MiB.
    pub flush_threshold_bytes: u64,
    /// Maximum age of the oldest unflushed byte before a flush is forced,
    /// even if `flush_threshold_bytes` has not been reached.
    ///
    /// Default: 30s.
    pub flush_threshold_time: Duration,
    /// Upper bound on the size of a single append, and therefore on the size
    /// of any single storage write produced by the flush planner.
    ///
    /// Default: 4 MiB.
    pub max_flush_size_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: 1024 * 1024,
            flush_threshold_time: Duration::from_secs(30),
            max_flush_size_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Build a [`Config`] with all defaults except `flush_threshold_bytes`.
    pub fn with_flush_threshold_bytes(mut self, bytes: u64) -> Self {
        self.flush_threshold_bytes = bytes;
        self
    }

    /// Build a [`Config`] with all defaults except `flush_threshold_time`.
    pub fn with_flush_threshold_time(mut self, time: Duration) -> Self {
        self.flush_threshold_time = time;
        self
    }

    /// Build a [`Config`] with all defaults except `max_flush_size_bytes`.
    pub fn with_max_flush_size_bytes(mut self, bytes: u64) -> Self {
        self.max_flush_size_bytes = bytes;
        self
    }
}
