//! Background collection and export.
//!
//! The scheduler runs on a dedicated thread, driving a current-thread Tokio runtime. It is split in
//! two tasks connected by a single-slot queue:
//!
//! - the collection loop, which ticks at the export interval, flushes every instrument into a
//!   batch, and pushes the batch into the queue
//! - the transport task, which pops batches and hands them to the exporter, one at a time
//!
//! The collection loop reserves the queue slot *before* flushing the aggregates. When the exporter
//! is slow, collection waits, and recorded values keep accumulating in the aggregates rather than
//! piling up as batches in memory.
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, trace, warn};

use crate::{
    data::ExportBatch,
    error::{FlushError, ShutdownError, TransportError, TransportErrorKind},
    exporter::{ExportAck, MetricExporter},
    state::PipelineState,
};

/// Reply channel for a flush request.
pub(crate) type FlushReply = crossbeam_channel::Sender<Result<(), FlushError>>;

/// Reply channel for a shutdown request.
pub(crate) type ShutdownReply = crossbeam_channel::Sender<Result<(), ShutdownError>>;

/// Requests sent from the pipeline handle to the scheduler.
pub(crate) enum Control {
    /// Collect immediately, replying once the resulting batch has been exported.
    Flush(FlushReply),

    /// Perform a final collection and export, then stop.
    Shutdown {
        /// Point in time by which the final export must have completed.
        deadline: std::time::Instant,

        /// Reply channel.
        reply: ShutdownReply,
    },
}

/// Scheduler configuration.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SchedulerConfiguration {
    /// Time between two collections.
    pub export_interval: Duration,

    /// Upper bound on a single export call.
    pub export_timeout: Duration,
}

struct Job {
    batch: ExportBatch,
    reply: Option<FlushReply>,
}

/// Periodic collection loop.
pub(crate) struct Scheduler {
    config: SchedulerConfiguration,
    state: Arc<PipelineState>,
    exporter: Arc<dyn MetricExporter>,
    last_end: SystemTime,
}

impl Scheduler {
    /// Creates a new `Scheduler`.
    ///
    /// The first batch starts at the time of this call.
    pub fn new(
        config: SchedulerConfiguration,
        state: Arc<PipelineState>,
        exporter: Arc<dyn MetricExporter>,
    ) -> Self {
        Scheduler { config, state, exporter, last_end: SystemTime::now() }
    }

    /// Runs the scheduler until it is told to shut down, or until every pipeline handle is gone.
    pub async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>) {
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let mut transport = tokio::spawn(run_transport(
            Arc::clone(&self.exporter),
            batch_rx,
            self.config.export_timeout,
        ));

        let interval = self.config.export_interval;
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(?interval, "Scheduler started.");

        // Set once a tick has fired, until its batch has been handed to the transport task.
        // Survives control messages handled in between.
        let mut tick_fired_at: Option<Instant> = None;

        let stop = loop {
            tokio::select! {
                biased;

                message = control.recv() => match message {
                    Some(Control::Flush(reply)) => {
                        trace!("Received flush request.");
                        match batch_tx.reserve().await {
                            Ok(permit) => {
                                permit.send(Job { batch: self.collect(), reply: Some(reply) });
                            }
                            Err(_) => {
                                let _ = reply.send(Err(FlushError::Shutdown));
                            }
                        }
                    }
                    Some(Control::Shutdown { deadline, reply }) => {
                        break Some((deadline, Some(reply)));
                    }
                    None => {
                        let deadline = std::time::Instant::now() + self.config.export_timeout;
                        break Some((deadline, None));
                    }
                },

                _ = ticker.tick(), if tick_fired_at.is_none() => {
                    tick_fired_at = Some(Instant::now());
                }

                // Reserving the slot before collecting is what applies backpressure: while the
                // previous batch is still being exported, values keep accumulating.
                reserved = batch_tx.reserve(), if tick_fired_at.is_some() => {
                    let waited =
                        tick_fired_at.take().map_or(Duration::ZERO, |fired_at| fired_at.elapsed());
                    match reserved {
                        Ok(permit) => {
                            if waited > interval {
                                warn!(
                                    ?waited,
                                    ?interval,
                                    "Export deadline missed, previous export still in progress."
                                );
                            }
                            permit.send(Job { batch: self.collect(), reply: None });
                        }
                        Err(_) => {
                            error!("Transport task stopped unexpectedly, stopping scheduler.");
                            break None;
                        }
                    }
                }
            }
        };

        match stop {
            Some((deadline, Some(reply))) => {
                let result = self.shutdown(batch_tx, &mut transport, deadline).await;
                let _ = reply.send(result);
            }
            Some((deadline, None)) => {
                if let Err(e) = self.shutdown(batch_tx, &mut transport, deadline).await {
                    error!(error = %e, "Failed to shut down scheduler after pipeline was dropped.");
                }
            }
            None => self.exporter.shutdown(),
        }

        debug!("Scheduler stopped.");
    }

    fn collect(&mut self) -> ExportBatch {
        let start = self.last_end;
        let end = SystemTime::now().max(start);
        self.last_end = end;

        let batch = self.state.collect(start, end);
        trace!(data_points = batch.data_point_count(), "Collected batch.");
        batch
    }

    async fn shutdown(
        &mut self,
        batch_tx: mpsc::Sender<Job>,
        transport: &mut JoinHandle<()>,
        deadline: std::time::Instant,
    ) -> Result<(), ShutdownError> {
        let deadline = Instant::from_std(deadline);
        let mut result = Ok(());

        match timeout_at(deadline, batch_tx.reserve()).await {
            Ok(Ok(permit)) => permit.send(Job { batch: self.collect(), reply: None }),
            Ok(Err(_)) => warn!("Transport task already stopped, skipping final export."),
            Err(_) => {
                warn!("Timed out waiting for in-flight export, discarding final batch.");
                result = Err(ShutdownError::TimedOut);
            }
        }

        // Closing the queue lets the transport task finish once the final batch is exported.
        drop(batch_tx);
        if timeout_at(deadline, &mut *transport).await.is_err() {
            transport.abort();
            error!("Final export missed the shutdown deadline, pending data was discarded.");
            result = Err(ShutdownError::TimedOut);
        }

        self.exporter.shutdown();
        result
    }
}

async fn run_transport(
    exporter: Arc<dyn MetricExporter>,
    mut batches: mpsc::Receiver<Job>,
    export_timeout: Duration,
) {
    let mut failures = FailureTracker::default();

    while let Some(Job { batch, reply }) = batches.recv().await {
        let data_points = batch.data_point_count();
        let result = match timeout(export_timeout, exporter.export(batch)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::retryable(
                TransportErrorKind::Timeout,
                format!("export did not complete within {export_timeout:?}"),
            )),
        };

        failures.observe(&result, data_points);

        if let Some(reply) = reply {
            let _ = reply.send(result.map(|_| ()).map_err(FlushError::from));
        }
    }
}

// Keeps repeated persistent failures from flooding the logs.
#[derive(Default)]
struct FailureTracker {
    persistent_reported: bool,
}

impl FailureTracker {
    fn observe(&mut self, result: &Result<ExportAck, TransportError>, data_points: usize) {
        match result {
            Ok(ack) => {
                if self.persistent_reported {
                    debug!("Export succeeded after persistent failures.");
                    self.persistent_reported = false;
                }

                if ack.is_full_success() {
                    trace!(data_points, "Exported batch.");
                } else {
                    warn!(
                        data_points,
                        rejected_data_points = ack.rejected_data_points,
                        message = ack.message.as_deref().unwrap_or(""),
                        "Collector rejected part of the batch."
                    );
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, data_points, "Failed to export batch, dropping it.");
            }
            Err(e) => {
                if self.persistent_reported {
                    debug!(error = %e, data_points, "Failed to export batch, dropping it.");
                } else {
                    error!(
                        error = %e,
                        data_points,
                        "Failed to export batch, dropping it. Repeats are logged at debug level."
                    );
                    self.persistent_reported = true;
                }
            }
        }
    }
}
