use std::{fmt, sync::Arc};

use quanta::Instant;

use crate::{
    error::MetricsError,
    storage::{AtomicCounter, AtomicHistogram},
};

/// Instrument kind.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum InstrumentKind {
    /// A monotonic counter.
    Counter,

    /// A bucketed histogram.
    Histogram,
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKind::Counter => f.write_str("counter"),
            InstrumentKind::Histogram => f.write_str("histogram"),
        }
    }
}

/// Identity and metadata of a registered instrument.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InstrumentDescriptor {
    name: String,
    description: String,
    unit: String,
    kind: InstrumentKind,
}

impl InstrumentDescriptor {
    /// Creates a new `InstrumentDescriptor`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        kind: InstrumentKind,
    ) -> Self {
        InstrumentDescriptor {
            name: name.into(),
            description: description.into(),
            unit: unit.into(),
            kind,
        }
    }

    /// Returns the instrument name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the instrument description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the instrument unit, or an empty string if none was given.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Returns the instrument kind.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }
}

/// Handle to a registered counter.
///
/// Clones are shallow and share the same underlying aggregate.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<AtomicCounter>,
}

impl Counter {
    pub(crate) fn from_arc(inner: Arc<AtomicCounter>) -> Self {
        Counter { inner }
    }

    pub(crate) fn into_inner(self) -> Arc<AtomicCounter> {
        self.inner
    }

    /// Adds `delta` to the counter.
    ///
    /// This never blocks, regardless of what the export side is doing.
    ///
    /// # Errors
    ///
    /// If `delta` is negative, NaN, or infinite, the call is rejected and the counter is left
    /// unchanged.
    pub fn add(&self, delta: f64) -> Result<(), MetricsError> {
        self.inner.add(delta)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter").finish_non_exhaustive()
    }
}

/// Handle to a registered histogram.
///
/// Clones are shallow and share the same underlying aggregate.
#[derive(Clone)]
pub struct Histogram {
    inner: Arc<AtomicHistogram>,
}

impl Histogram {
    pub(crate) fn from_arc(inner: Arc<AtomicHistogram>) -> Self {
        Histogram { inner }
    }

    pub(crate) fn into_inner(self) -> Arc<AtomicHistogram> {
        self.inner
    }

    /// Records a single observation.
    ///
    /// This never blocks, regardless of what the export side is doing.
    ///
    /// # Errors
    ///
    /// If `value` is NaN or infinite, the call is rejected and the histogram is left unchanged.
    pub fn record(&self, value: f64) -> Result<(), MetricsError> {
        self.inner.record(value)
    }

    /// Runs `f`, recording its wall-clock duration in milliseconds.
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        // Elapsed time is always finite, so recording cannot be rejected.
        let _ = self.inner.record(elapsed_ms);
        result
    }

    /// Returns the bucket boundaries of this histogram.
    pub fn boundaries(&self) -> &[f64] {
        self.inner.bounds()
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram").field("boundaries", &self.boundaries()).finish_non_exhaustive()
    }
}
