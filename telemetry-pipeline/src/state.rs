use std::{sync::Arc, time::SystemTime};

use scc::{hash_map::Entry, HashMap};
use tracing::{debug, warn};

use crate::{
    data::ExportBatch,
    meter::{InstrumentationScope, Meter},
    resource::Resource,
};

/// Pipeline state shared between the public handle and the scheduler.
pub(crate) struct PipelineState {
    resource: Arc<Resource>,
    meters: HashMap<String, Meter>,
}

impl PipelineState {
    /// Creates a new `PipelineState` for the given resource.
    pub fn new(resource: Resource) -> Self {
        PipelineState { resource: Arc::new(resource), meters: HashMap::new() }
    }

    /// Returns the resource.
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// Creates, or gets, the meter for the given scope.
    ///
    /// Meters are keyed by scope name. Asking for a known name with a different version returns the
    /// existing meter.
    pub fn meter(&self, scope: InstrumentationScope) -> Meter {
        if let Some(meter) = self.meters.read(scope.name(), |_, meter| meter.clone()) {
            check_version(meter.scope(), &scope);
            return meter;
        }

        match self.meters.entry(scope.name().to_owned()) {
            Entry::Occupied(entry) => {
                let meter = entry.get().clone();
                check_version(meter.scope(), &scope);
                meter
            }
            Entry::Vacant(entry) => {
                debug!(%scope, "Created meter.");
                entry.insert_entry(Meter::new(scope)).get().clone()
            }
        }
    }

    /// Flushes every instrument of every meter into a batch covering `[start, end)`.
    pub fn collect(&self, start: SystemTime, end: SystemTime) -> ExportBatch {
        let mut meters = Vec::with_capacity(self.meters.len());
        self.meters.scan(|_, meter| meters.push(meter.clone()));
        meters.sort_by(|a, b| a.scope().cmp(b.scope()));

        let scope_metrics = meters.iter().map(Meter::collect).collect();
        ExportBatch::new(Arc::clone(&self.resource), start, end, scope_metrics)
    }
}

fn check_version(existing: &InstrumentationScope, requested: &InstrumentationScope) {
    if existing.version() != requested.version() {
        warn!(
            scope = existing.name(),
            existing_version = existing.version(),
            requested_version = requested.version(),
            "Meter already exists with a different version, reusing it."
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::PipelineState;
    use crate::{meter::InstrumentationScope, resource::Resource};

    #[test]
    fn meters_are_shared_by_name() {
        let state = PipelineState::new(Resource::default());
        let a = state.meter(InstrumentationScope::new("sample-app").with_version("0.1.2"));
        let b = state.meter(InstrumentationScope::new("sample-app"));
        assert_eq!(b.scope().version(), Some("0.1.2"));

        a.create_counter("http_requests_total", "").unwrap().add(1.0).unwrap();
        b.create_counter("http_requests_total", "").unwrap().add(1.0).unwrap();

        let start = SystemTime::UNIX_EPOCH;
        let end = start + Duration::from_secs(1);
        let batch = state.collect(start, end);
        assert_eq!(batch.scope_metrics().len(), 1);
        assert_eq!(batch.counter_value("http_requests_total"), Some(2.0));
        assert_eq!(batch.start(), start);
        assert_eq!(batch.end(), end);
        assert_eq!(batch.resource().service_name(), Some("unknown_service"));
    }

    #[test]
    fn collect_groups_by_scope() {
        let state = PipelineState::new(Resource::default());
        state.meter("zeta".into()).create_counter("z", "").unwrap();
        state.meter("alpha".into()).create_counter("a", "").unwrap();

        let batch = state.collect(SystemTime::UNIX_EPOCH, SystemTime::UNIX_EPOCH);
        let scopes = batch.scope_metrics().iter().map(|s| s.scope.name()).collect::<Vec<_>>();
        assert_eq!(scopes, ["alpha", "zeta"]);
        assert_eq!(batch.data_point_count(), 2);
    }
}
