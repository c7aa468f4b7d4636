use std::sync::Arc;

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use scc::HashMap;
use tracing::{error, trace};

use crate::{error::BuildError, instrument::InstrumentKind, meter::Meter};

#[derive(Clone)]
struct Description {
    unit: Option<Unit>,
    text: SharedString,
}

/// A [`metrics`] recorder that feeds the instruments of a [`Meter`].
///
/// With this recorder installed, `metrics::counter!` and `metrics::histogram!` update the same
/// aggregates as the [`Meter`] API, and are exported by the same pipeline.
///
/// Instruments are identified by name only: labels are not carried over. Gauges are not supported,
/// and registering one yields a no-op handle. Descriptions passed to `describe_*` are applied to
/// instruments that are registered afterwards.
#[derive(Clone)]
pub struct MetricsRecorder {
    meter: Meter,
    descriptions: Arc<HashMap<(KeyName, InstrumentKind), Description>>,
}

impl MetricsRecorder {
    /// Creates a new `MetricsRecorder` registering instruments with the given meter.
    pub fn new(meter: Meter) -> Self {
        MetricsRecorder { meter, descriptions: Arc::new(HashMap::new()) }
    }

    /// Installs this recorder as the global recorder.
    ///
    /// # Errors
    ///
    /// If a global recorder was already installed, an error will be returned.
    pub fn install(self) -> Result<(), BuildError> {
        metrics::set_global_recorder(self).map_err(|_| BuildError::FailedToInstall)
    }

    fn describe(&self, key: KeyName, kind: InstrumentKind, unit: Option<Unit>, text: SharedString) {
        let description = Description { unit, text };
        match self.descriptions.entry((key, kind)) {
            scc::hash_map::Entry::Occupied(mut entry) => *entry.get_mut() = description,
            scc::hash_map::Entry::Vacant(entry) => {
                entry.insert_entry(description);
            }
        }
    }

    fn description(&self, key: &Key, kind: InstrumentKind) -> Option<Description> {
        let key_name = KeyName::from(key.name().to_owned());
        self.descriptions.read(&(key_name, kind), |_, description| description.clone())
    }
}

fn unit_label(description: Option<&Description>) -> String {
    description
        .and_then(|d| d.unit)
        .map_or_else(String::new, |unit| unit.as_canonical_label().to_owned())
}

impl Recorder for MetricsRecorder {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.describe(key, InstrumentKind::Counter, unit, description);
    }

    fn describe_gauge(&self, key: KeyName, _: Option<Unit>, _: SharedString) {
        trace!(gauge = key.as_str(), "Ignoring gauge description, gauges are not supported.");
    }

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.describe(key, InstrumentKind::Histogram, unit, description);
    }

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        let description = self.description(key, InstrumentKind::Counter);
        let text = description.as_ref().map_or("", |d| &*d.text);

        match self.meter.register_counter(key.name(), text, &unit_label(description.as_ref())) {
            Ok(counter) => Counter::from_arc(counter.into_inner()),
            Err(e) => {
                error!(error = %e, "Failed to register counter, updates will be discarded.");
                Counter::noop()
            }
        }
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        trace!(gauge = key.name(), "Gauges are not supported, returning a no-op handle.");
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        let description = self.description(key, InstrumentKind::Histogram);
        let text = description.as_ref().map_or("", |d| &*d.text);

        let unit = unit_label(description.as_ref());
        match self.meter.register_histogram(key.name(), text, &unit, None) {
            Ok(histogram) => Histogram::from_arc(histogram.into_inner()),
            Err(e) => {
                error!(error = %e, "Failed to register histogram, updates will be discarded.");
                Histogram::noop()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use metrics::{Key, Metadata, Recorder as _, Unit};

    use super::MetricsRecorder;
    use crate::{
        data::MetricData,
        meter::{InstrumentationScope, Meter},
    };

    static METADATA: Metadata<'static> = Metadata::new(module_path!(), metrics::Level::INFO, None);

    #[test]
    fn feeds_meter_instruments() {
        let meter = Meter::new(InstrumentationScope::new("sample-app"));
        let recorder = MetricsRecorder::new(meter.clone());

        recorder.describe_histogram(
            "http_request_duration_milliseconds".into(),
            Some(Unit::Milliseconds),
            "Duration of HTTP requests in milliseconds".into(),
        );

        let counter = recorder.register_counter(&Key::from_name("http_requests_total"), &METADATA);
        counter.increment(3);

        let key = Key::from_name("http_request_duration_milliseconds");
        let histogram = recorder.register_histogram(&key, &METADATA);
        histogram.record(12.0);
        histogram.record(f64::NAN);

        // The same aggregate is reachable through the meter.
        meter.create_counter("http_requests_total", "").unwrap().add(1.0).unwrap();

        let collected = meter.collect();
        let requests = &collected.metrics[1];
        assert_eq!(requests.descriptor.name(), "http_requests_total");
        assert!(matches!(requests.data, MetricData::Counter(snapshot) if snapshot.value == 4.0));

        let durations = &collected.metrics[0];
        assert_eq!(durations.descriptor.unit(), "ms");
        assert_eq!(durations.descriptor.description(), "Duration of HTTP requests in milliseconds");
        match &durations.data {
            MetricData::Histogram(snapshot) => {
                assert_eq!(snapshot.count, 1);
                assert_eq!(snapshot.sum, 12.0);
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn conflicts_and_gauges_are_noops() {
        let meter = Meter::new(InstrumentationScope::new("sample-app"));
        let recorder = MetricsRecorder::new(meter.clone());

        recorder.register_histogram(&Key::from_name("requests"), &METADATA).record(1.0);
        recorder.register_counter(&Key::from_name("requests"), &METADATA).increment(1);
        recorder.register_gauge(&Key::from_name("in_flight"), &METADATA).set(3.0);

        let collected = meter.collect();
        assert_eq!(collected.metrics.len(), 1);
        assert!(matches!(&collected.metrics[0].data, MetricData::Histogram(s) if s.count == 1));
    }
}
