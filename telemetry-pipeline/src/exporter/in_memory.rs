use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tracing::debug;

use super::{ExportAck, ExportFuture, MetricExporter};
use crate::{data::ExportBatch, error::TransportError};

#[derive(Default)]
struct Inner {
    batches: Mutex<Vec<ExportBatch>>,
    failures: Mutex<VecDeque<TransportError>>,
    delay: Mutex<Option<Duration>>,
    attempts: AtomicUsize,
    is_shutdown: AtomicBool,
}

/// An exporter that keeps every batch it receives in memory.
///
/// Clones share the same storage, so a clone can be handed to a pipeline while the original is kept
/// around to inspect what was exported. Failures and slow collectors can be simulated with
/// [`fail_next`][Self::fail_next] and [`set_export_delay`][Self::set_export_delay].
#[derive(Clone, Default)]
pub struct InMemoryExporter {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryExporter {
    /// Creates a new `InMemoryExporter`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` exports fail with `error`.
    ///
    /// Failed batches are not stored.
    pub fn fail_next(&self, count: usize, error: TransportError) {
        let mut failures = lock(&self.inner.failures);
        failures.extend(std::iter::repeat(error).take(count));
    }

    /// Delays every subsequent export by `delay` before it completes.
    pub fn set_export_delay(&self, delay: Option<Duration>) {
        *lock(&self.inner.delay) = delay;
    }

    /// Returns a copy of every batch exported so far.
    pub fn batches(&self) -> Vec<ExportBatch> {
        lock(&self.inner.batches).clone()
    }

    /// Removes and returns every batch exported so far.
    pub fn take_batches(&self) -> Vec<ExportBatch> {
        std::mem::take(&mut *lock(&self.inner.batches))
    }

    /// Returns the number of export attempts, including failed ones.
    pub fn export_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Returns `true` once the exporter has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Acquire)
    }
}

impl MetricExporter for InMemoryExporter {
    fn export(&self, batch: ExportBatch) -> ExportFuture<'_> {
        Box::pin(async move {
            self.inner.attempts.fetch_add(1, Ordering::AcqRel);

            let delay = *lock(&self.inner.delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let failure = lock(&self.inner.failures).pop_front();
            if let Some(error) = failure {
                return Err(error);
            }

            debug!(data_points = batch.data_point_count(), "Stored batch in memory.");
            lock(&self.inner.batches).push(batch);
            Ok(ExportAck::default())
        })
    }

    fn shutdown(&self) {
        self.inner.is_shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::SystemTime};

    use super::InMemoryExporter;
    use crate::{
        data::ExportBatch,
        error::{TransportError, TransportErrorKind},
        exporter::MetricExporter,
        resource::Resource,
    };

    fn batch() -> ExportBatch {
        let now = SystemTime::now();
        ExportBatch::new(Arc::new(Resource::default()), now, now, Vec::new())
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(future)
    }

    #[test]
    fn stores_batches_and_injects_failures() {
        let exporter = InMemoryExporter::new();
        let observer = exporter.clone();

        exporter.fail_next(1, TransportError::retryable(TransportErrorKind::Connect, "refused"));

        let result = block_on(exporter.export(batch()));
        assert_eq!(result.unwrap_err().kind(), TransportErrorKind::Connect);
        assert!(observer.batches().is_empty());

        let ack = block_on(exporter.export(batch())).unwrap();
        assert!(ack.is_full_success());
        assert_eq!(observer.export_attempts(), 2);
        assert_eq!(observer.take_batches().len(), 1);
        assert!(observer.batches().is_empty());

        assert!(!observer.is_shutdown());
        exporter.shutdown();
        assert!(observer.is_shutdown());
    }
}
