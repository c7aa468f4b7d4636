use metrics::CounterFn;
use portable_atomic::{AtomicF64, Ordering};
use tracing::trace;

use crate::error::MetricsError;

/// Delta-temporality counter.
pub(crate) struct AtomicCounter {
    sum: AtomicF64,
}

impl AtomicCounter {
    /// Creates a new `AtomicCounter`.
    pub fn new() -> Self {
        Self { sum: AtomicF64::new(0.0) }
    }

    /// Adds `delta` to the counter.
    pub fn add(&self, delta: f64) -> Result<(), MetricsError> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(MetricsError::invalid_argument(format!(
                "counter delta must be a finite, non-negative number, got {delta}"
            )));
        }

        self.sum.fetch_add(delta, Ordering::AcqRel);
        Ok(())
    }

    /// Flushes the counter, returning the sum of all deltas added since the last flush.
    pub fn flush(&self) -> f64 {
        self.sum.swap(0.0, Ordering::AcqRel)
    }
}

impl CounterFn for AtomicCounter {
    fn increment(&self, value: u64) {
        // `u64` values are never negative, and always finite once converted.
        let _ = self.add(value as f64);
    }

    fn absolute(&self, value: u64) {
        // Absolute values have no meaning for a counter that resets on every flush.
        trace!(value, "Ignoring absolute update to delta counter.");
    }
}
