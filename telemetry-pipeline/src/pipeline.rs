use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, RecvTimeoutError};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::{
    builder::MetricsPipelineBuilder,
    error::{FlushError, ShutdownError},
    exporter::MetricExporter,
    meter::{InstrumentationScope, Meter},
    resource::Resource,
    scheduler::Control,
    state::PipelineState,
};

// Extra time granted to the scheduler thread to report back after its own deadline has passed.
const REPLY_GRACE: Duration = Duration::from_millis(250);

/// A running metrics pipeline.
///
/// The pipeline owns the instrument registry and a background thread that periodically collects
/// every instrument and hands the resulting batch to the exporter. Recording through instrument
/// handles never blocks on, or waits for, the export side.
///
/// Dropping the pipeline shuts it down, as if [`shutdown`][Self::shutdown] had been called.
pub struct MetricsPipeline {
    state: Arc<PipelineState>,
    control: mpsc::UnboundedSender<Control>,
    handle: Mutex<Option<JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    export_timeout: Duration,
    shutdown_timeout: Duration,
}

impl MetricsPipeline {
    /// Creates a [`MetricsPipelineBuilder`] exporting to the given exporter.
    pub fn builder<E>(exporter: E) -> MetricsPipelineBuilder
    where
        E: MetricExporter,
    {
        MetricsPipelineBuilder::new(exporter)
    }

    pub(crate) fn new(
        state: Arc<PipelineState>,
        control: mpsc::UnboundedSender<Control>,
        handle: JoinHandle<()>,
        export_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        MetricsPipeline {
            state,
            control,
            handle: Mutex::new(Some(handle)),
            is_shutdown: AtomicBool::new(false),
            export_timeout,
            shutdown_timeout,
        }
    }

    /// Creates, or gets, the meter for the given instrumentation scope.
    ///
    /// Meters are identified by name: asking twice for the same name returns handles to the same
    /// set of instruments.
    pub fn meter(&self, name: &str, version: Option<&str>) -> Meter {
        let scope = InstrumentationScope::new(name);
        let scope = match version {
            Some(version) => scope.with_version(version),
            None => scope,
        };

        self.state.meter(scope)
    }

    /// Returns the resource attached to every exported batch.
    pub fn resource(&self) -> &Resource {
        self.state.resource()
    }

    /// Returns `true` if the pipeline has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }

    /// Collects every instrument immediately and waits for the resulting batch to be exported.
    ///
    /// Waits at most for the export timeout. The regular export schedule is not affected.
    ///
    /// # Errors
    ///
    /// If the pipeline is shut down, if the export did not complete in time, or if the exporter
    /// failed, an error will be returned.
    pub fn force_flush(&self) -> Result<(), FlushError> {
        if self.is_shutdown() {
            return Err(FlushError::Shutdown);
        }

        let (reply_tx, reply_rx) = bounded(1);
        self.control.send(Control::Flush(reply_tx)).map_err(|_| FlushError::Shutdown)?;

        match reply_rx.recv_timeout(self.export_timeout + REPLY_GRACE) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(FlushError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(FlushError::Shutdown),
        }
    }

    /// Shuts down the pipeline.
    ///
    /// Stops the export schedule, collects and exports whatever was recorded since the last export,
    /// and then shuts down the exporter. The whole operation is bounded by the shutdown timeout:
    /// if the final export has not completed by then, it is abandoned and the data is lost.
    ///
    /// Instrument handles remain usable afterwards, but values recorded through them are never
    /// exported.
    ///
    /// # Errors
    ///
    /// If the pipeline was already shut down, or the final export did not complete in time, an
    /// error will be returned.
    pub fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return Err(ShutdownError::AlreadyShutdown);
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        let (reply_tx, reply_rx) = bounded(1);
        if self.control.send(Control::Shutdown { deadline, reply: reply_tx }).is_err() {
            debug!("Scheduler already stopped.");
            return Ok(());
        }

        let result = match reply_rx.recv_timeout(self.shutdown_timeout + REPLY_GRACE) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                error!("Scheduler did not stop before the shutdown deadline.");
                return Err(ShutdownError::TimedOut);
            }
            Err(RecvTimeoutError::Disconnected) => Ok(()),
        };

        // The scheduler has replied, so its thread is about to exit.
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Scheduler thread panicked.");
            }
        }

        result
    }
}

impl Drop for MetricsPipeline {
    fn drop(&mut self) {
        if self.is_shutdown() {
            return;
        }

        if let Err(e) = self.shutdown() {
            error!(error = %e, "Failed to shut down metrics pipeline on drop.");
        }
    }
}

impl std::fmt::Debug for MetricsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsPipeline")
            .field("resource", self.resource())
            .field("is_shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
