//! Delivery of export batches to a collector.
use std::{future::Future, pin::Pin};

use crate::{data::ExportBatch, error::TransportError};

mod in_memory;
pub use self::in_memory::InMemoryExporter;

/// Future returned by [`MetricExporter::export`].
pub type ExportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ExportAck, TransportError>> + Send + 'a>>;

/// Acknowledgement of a delivered batch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExportAck {
    /// Number of data points the collector rejected.
    ///
    /// Zero when the whole batch was accepted.
    pub rejected_data_points: i64,

    /// Optional message from the collector, typically explaining rejected data points.
    pub message: Option<String>,
}

impl ExportAck {
    /// Returns `true` if the collector accepted every data point.
    pub fn is_full_success(&self) -> bool {
        self.rejected_data_points == 0
    }
}

/// Transport for export batches.
///
/// Exporters are driven by a single background task: `export` is never called again before the
/// previous call has resolved, and calls are bounded by the pipeline's export timeout, so
/// implementations do not need their own deadline handling.
pub trait MetricExporter: Send + Sync + 'static {
    /// Delivers a batch.
    fn export(&self, batch: ExportBatch) -> ExportFuture<'_>;

    /// Releases any resources held by the exporter.
    ///
    /// Called once, after the final export of a pipeline that is shutting down.
    fn shutdown(&self) {}
}

impl<E> MetricExporter for std::sync::Arc<E>
where
    E: MetricExporter,
{
    fn export(&self, batch: ExportBatch) -> ExportFuture<'_> {
        (**self).export(batch)
    }

    fn shutdown(&self) {
        (**self).shutdown();
    }
}
