use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, PoisonError,
};

use crossbeam_utils::Backoff;
use metrics::HistogramFn;
use portable_atomic::AtomicF64;
use tracing::trace;

use crate::{data::HistogramSnapshot, error::MetricsError};

/// Default bucket boundaries, suited to request latencies in milliseconds.
pub const DEFAULT_BOUNDARIES: &[f64] = &[
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

const HOT_BIT: u64 = 1 << 63;
const COUNT_MASK: u64 = HOT_BIT - 1;

/// Checks that bucket boundaries are finite and strictly ascending.
pub(crate) fn validate_boundaries(bounds: &[f64]) -> Result<(), MetricsError> {
    if let Some(bound) = bounds.iter().find(|b| !b.is_finite()) {
        return Err(MetricsError::invalid_argument(format!(
            "histogram boundaries must be finite, got {bound}"
        )));
    }

    if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(MetricsError::invalid_argument(
            "histogram boundaries must be strictly ascending",
        ));
    }

    Ok(())
}

struct Shard {
    buckets: Box<[AtomicU64]>,
    sum: AtomicF64,
    min: AtomicF64,
    max: AtomicF64,
    completed: AtomicU64,
}

impl Shard {
    fn new(bucket_count: usize) -> Self {
        Shard {
            buckets: (0..bucket_count).map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicF64::new(0.0),
            min: AtomicF64::new(f64::INFINITY),
            max: AtomicF64::new(f64::NEG_INFINITY),
            completed: AtomicU64::new(0),
        }
    }

    fn record(&self, bucket: usize, value: f64) {
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);

        // Publishes the writes above to the collector waiting on this shard.
        self.completed.fetch_add(1, Ordering::Release);
    }

    fn drain(&self, bounds: &[f64]) -> HistogramSnapshot {
        let bucket_counts = self
            .buckets
            .iter()
            .map(|bucket| bucket.swap(0, Ordering::Relaxed))
            .collect::<Vec<_>>();
        let count = self.completed.swap(0, Ordering::Relaxed);
        let sum = self.sum.swap(0.0, Ordering::Relaxed);
        let min = self.min.swap(f64::INFINITY, Ordering::Relaxed);
        let max = self.max.swap(f64::NEG_INFINITY, Ordering::Relaxed);

        HistogramSnapshot {
            count,
            sum,
            min: (count > 0).then_some(min),
            max: (count > 0).then_some(max),
            bounds: bounds.to_vec(),
            bucket_counts,
        }
    }
}

/// Delta-temporality bucketed histogram.
///
/// Recording is wait-free apart from the `fetch_min`/`fetch_max` retry loops. Values are
/// written into whichever of the two shards is currently hot. Flushing swaps the hot shard,
/// waits for every observation that was started against the now-cold shard to complete, and
/// then drains it. No observation is lost or counted twice, even when recording runs
/// concurrently with the flush.
pub(crate) struct AtomicHistogram {
    bounds: Box<[f64]>,
    // Top bit: index of the hot shard. Low bits: number of observations started, ever.
    state: AtomicU64,
    shards: [Shard; 2],
    // Number of observations started as of the previous flush.
    collect_lock: Mutex<u64>,
}

impl AtomicHistogram {
    /// Creates a new `AtomicHistogram` with the given bucket boundaries.
    ///
    /// # Errors
    ///
    /// If the boundaries are not finite and strictly ascending, an error will be returned.
    pub fn new(bounds: &[f64]) -> Result<Self, MetricsError> {
        validate_boundaries(bounds)?;

        let bucket_count = bounds.len() + 1;
        Ok(AtomicHistogram {
            bounds: bounds.into(),
            state: AtomicU64::new(0),
            shards: [Shard::new(bucket_count), Shard::new(bucket_count)],
            collect_lock: Mutex::new(0),
        })
    }

    /// Returns the bucket boundaries.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Records a single observation.
    pub fn record(&self, value: f64) -> Result<(), MetricsError> {
        if !value.is_finite() {
            return Err(MetricsError::invalid_argument(format!(
                "histogram value must be finite, got {value}"
            )));
        }

        // Bucket `i` holds values in `(bounds[i - 1], bounds[i]]`.
        let bucket = self.bounds.partition_point(|bound| *bound < value);

        let state = self.state.fetch_add(1, Ordering::AcqRel);
        let shard = &self.shards[(state >> 63) as usize];
        shard.record(bucket, value);

        Ok(())
    }

    /// Flushes the histogram, returning everything recorded since the last flush.
    pub fn flush(&self) -> HistogramSnapshot {
        let mut last_started = self.collect_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Flip the hot bit. Observations that already incremented the state are bound to the
        // shard that was hot until now.
        let state = self.state.fetch_add(HOT_BIT, Ordering::AcqRel);
        let started = state & COUNT_MASK;
        let expected = started.wrapping_sub(*last_started) & COUNT_MASK;
        *last_started = started;

        let cold = &self.shards[(state >> 63) as usize];
        let backoff = Backoff::new();
        while cold.completed.load(Ordering::Acquire) != expected {
            backoff.snooze();
        }

        let snapshot = cold.drain(&self.bounds);
        trace!(count = snapshot.count, "Flushed histogram shard.");
        snapshot
    }
}

impl HistogramFn for AtomicHistogram {
    fn record(&self, value: f64) {
        if let Err(e) = AtomicHistogram::record(self, value) {
            trace!(error = %e, "Dropping invalid histogram value.");
        }
    }
}
