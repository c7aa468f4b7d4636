//! Exportable snapshots of aggregated metrics.
use std::{sync::Arc, time::SystemTime};

use crate::{instrument::InstrumentDescriptor, meter::InstrumentationScope, resource::Resource};

/// Delta of a counter over one export interval.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CounterSnapshot {
    /// Sum of all deltas added during the interval.
    pub value: f64,
}

/// Distribution of a histogram over one export interval.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,

    /// Sum of all observations.
    pub sum: f64,

    /// Smallest observation, or `None` if there were no observations.
    pub min: Option<f64>,

    /// Largest observation, or `None` if there were no observations.
    pub max: Option<f64>,

    /// Bucket boundaries.
    pub bounds: Vec<f64>,

    /// Per-bucket observation counts.
    ///
    /// Always has one more element than `bounds`: the last bucket counts values greater than the
    /// last boundary.
    pub bucket_counts: Vec<u64>,
}

/// Aggregated data of a single instrument.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricData {
    /// Counter data.
    Counter(CounterSnapshot),

    /// Histogram data.
    Histogram(HistogramSnapshot),
}

/// A single instrument and its aggregated data.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    /// The instrument the data belongs to.
    pub descriptor: InstrumentDescriptor,

    /// Aggregated data.
    pub data: MetricData,
}

/// Metrics of every instrument created by one meter.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopeMetrics {
    /// The meter's instrumentation scope.
    pub scope: InstrumentationScope,

    /// Metrics, ordered by instrument name.
    pub metrics: Vec<Metric>,
}

/// One periodic snapshot of every instrument, ready to be handed to an exporter.
///
/// Covers the half-open time range `[start, end)`. Successive batches produced by a pipeline
/// never overlap: each batch starts where the previous one ended.
#[derive(Clone, Debug)]
pub struct ExportBatch {
    resource: Arc<Resource>,
    start: SystemTime,
    end: SystemTime,
    scope_metrics: Vec<ScopeMetrics>,
}

impl ExportBatch {
    /// Creates a new `ExportBatch`.
    pub fn new(
        resource: Arc<Resource>,
        start: SystemTime,
        end: SystemTime,
        scope_metrics: Vec<ScopeMetrics>,
    ) -> Self {
        ExportBatch { resource, start, end, scope_metrics }
    }

    /// Returns the resource describing the producing process.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Returns the start of the covered time range.
    pub fn start(&self) -> SystemTime {
        self.start
    }

    /// Returns the end of the covered time range.
    pub fn end(&self) -> SystemTime {
        self.end
    }

    /// Returns the metrics, grouped by instrumentation scope.
    pub fn scope_metrics(&self) -> &[ScopeMetrics] {
        &self.scope_metrics
    }

    /// Finds the metric with the given name, in any scope.
    pub fn find(&self, name: &str) -> Option<&Metric> {
        self.scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .find(|metric| metric.descriptor.name() == name)
    }

    /// Returns the counter delta recorded under the given name, if any.
    pub fn counter_value(&self, name: &str) -> Option<f64> {
        match self.find(name).map(|metric| &metric.data) {
            Some(MetricData::Counter(snapshot)) => Some(snapshot.value),
            _ => None,
        }
    }

    /// Returns the histogram snapshot recorded under the given name, if any.
    pub fn histogram(&self, name: &str) -> Option<&HistogramSnapshot> {
        match self.find(name).map(|metric| &metric.data) {
            Some(MetricData::Histogram(snapshot)) => Some(snapshot),
            _ => None,
        }
    }

    /// Returns the total number of data points in the batch.
    pub fn data_point_count(&self) -> usize {
        self.scope_metrics.iter().map(|scope| scope.metrics.len()).sum()
    }
}
