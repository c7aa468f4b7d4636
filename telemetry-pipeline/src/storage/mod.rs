//! Lock-free aggregation of recorded values.
//!
//! Aggregates use delta temporality: every flush returns what was recorded since the previous
//! flush and resets the aggregate to its zero state. Flushing is linearizable with respect to
//! concurrent recording, so each recorded value lands in exactly one flush.

mod counter;
pub(crate) use self::counter::AtomicCounter;

mod histogram;
pub use self::histogram::DEFAULT_BOUNDARIES;
pub(crate) use self::histogram::{validate_boundaries, AtomicHistogram};
