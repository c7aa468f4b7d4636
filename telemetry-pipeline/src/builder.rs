use std::{sync::Arc, thread, time::Duration};

use tokio::{runtime, sync::mpsc};
use tracing::debug;

use crate::{
    error::BuildError,
    exporter::MetricExporter,
    pipeline::MetricsPipeline,
    resource::Resource,
    scheduler::{Scheduler, SchedulerConfiguration},
    state::PipelineState,
};

/// Default time between two exports.
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default upper bound on a single export.
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound on shutting down a pipeline.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEDULER_THREAD_NAME: &str = "telemetry-pipeline-scheduler";

/// Builder for a [`MetricsPipeline`].
pub struct MetricsPipelineBuilder {
    exporter: Arc<dyn MetricExporter>,
    resource: Option<Resource>,
    export_interval: Duration,
    export_timeout: Duration,
    shutdown_timeout: Duration,
}

impl MetricsPipelineBuilder {
    /// Creates a new `MetricsPipelineBuilder` exporting to the given exporter.
    pub fn new<E>(exporter: E) -> Self
    where
        E: MetricExporter,
    {
        MetricsPipelineBuilder {
            exporter: Arc::new(exporter),
            resource: None,
            export_interval: DEFAULT_EXPORT_INTERVAL,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Sets the resource attached to every exported batch.
    ///
    /// Defaults to [`Resource::default`].
    #[must_use]
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Sets the time between two exports.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_export_interval(mut self, interval: Duration) -> Self {
        self.export_interval = interval;
        self
    }

    /// Sets the upper bound on a single export.
    ///
    /// An export that has not completed by then is abandoned, and its batch is dropped.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Sets the upper bound on shutting down the pipeline, final export included.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builds the pipeline and starts exporting.
    ///
    /// A background thread is spawned to drive the export schedule. The first export happens one
    /// export interval after this call.
    ///
    /// # Errors
    ///
    /// If any of the durations is zero, or the background thread could not be spawned, an error
    /// will be returned.
    pub fn build(self) -> Result<MetricsPipeline, BuildError> {
        for (name, value) in [
            ("export interval", self.export_interval),
            ("export timeout", self.export_timeout),
            ("shutdown timeout", self.shutdown_timeout),
        ] {
            if value.is_zero() {
                return Err(BuildError::InvalidConfiguration {
                    reason: format!("{name} must be non-zero"),
                });
            }
        }

        let state = Arc::new(PipelineState::new(self.resource.unwrap_or_default()));
        let config = SchedulerConfiguration {
            export_interval: self.export_interval,
            export_timeout: self.export_timeout,
        };
        let scheduler = Scheduler::new(config, Arc::clone(&state), self.exporter);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BuildError::Backend(e.to_string()))?;

        let handle = thread::Builder::new()
            .name(SCHEDULER_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(scheduler.run(control_rx)))
            .map_err(|e| BuildError::Backend(e.to_string()))?;

        debug!(
            export_interval = ?self.export_interval,
            export_timeout = ?self.export_timeout,
            shutdown_timeout = ?self.shutdown_timeout,
            "Built metrics pipeline."
        );

        Ok(MetricsPipeline::new(
            state,
            control_tx,
            handle,
            self.export_timeout,
            self.shutdown_timeout,
        ))
    }
}
