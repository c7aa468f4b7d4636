use std::time::{SystemTime, UNIX_EPOCH};

use telemetry_pipeline::{
    data::{CounterSnapshot, HistogramSnapshot, Metric, MetricData, ScopeMetrics},
    AttributeValue, ExportBatch, InstrumentationScope, Resource,
};

use crate::proto::{self, any_value, metric, number_data_point, AggregationTemporality};

/// Converts an export batch into an OTLP export request.
///
/// Every data point carries the batch time range. Counters become monotonic delta sums, and
/// histograms become explicit-bucket delta histograms.
pub(crate) fn to_request(batch: &ExportBatch) -> proto::ExportMetricsServiceRequest {
    let range = TimeRange { start: unix_nanos(batch.start()), end: unix_nanos(batch.end()) };

    let resource_metrics = proto::ResourceMetrics {
        resource: Some(resource(batch.resource())),
        scope_metrics: batch
            .scope_metrics()
            .iter()
            .map(|scope| scope_metrics(scope, range))
            .collect(),
        schema_url: String::new(),
    };

    proto::ExportMetricsServiceRequest { resource_metrics: vec![resource_metrics] }
}

#[derive(Clone, Copy)]
struct TimeRange {
    start: u64,
    end: u64,
}

fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

fn resource(resource: &Resource) -> proto::Resource {
    let attributes = resource.iter().map(|(key, value)| key_value(key, value)).collect();
    proto::Resource { attributes, dropped_attributes_count: 0 }
}

fn key_value(key: &str, value: &AttributeValue) -> proto::KeyValue {
    let value = match value {
        AttributeValue::String(s) => any_value::Value::StringValue(s.clone()),
        AttributeValue::Bool(b) => any_value::Value::BoolValue(*b),
        AttributeValue::I64(i) => any_value::Value::IntValue(*i),
        AttributeValue::F64(f) => any_value::Value::DoubleValue(*f),
    };

    proto::KeyValue { key: key.to_owned(), value: Some(proto::AnyValue { value: Some(value) }) }
}

fn scope(scope: &InstrumentationScope) -> proto::InstrumentationScope {
    proto::InstrumentationScope {
        name: scope.name().to_owned(),
        version: scope.version().unwrap_or_default().to_owned(),
    }
}

fn scope_metrics(scope_metrics: &ScopeMetrics, range: TimeRange) -> proto::ScopeMetrics {
    proto::ScopeMetrics {
        scope: Some(scope(&scope_metrics.scope)),
        metrics: scope_metrics.metrics.iter().map(|m| metric(m, range)).collect(),
        schema_url: String::new(),
    }
}

fn metric(metric: &Metric, range: TimeRange) -> proto::Metric {
    let data = match &metric.data {
        MetricData::Counter(snapshot) => metric::Data::Sum(sum(snapshot, range)),
        MetricData::Histogram(snapshot) => metric::Data::Histogram(histogram(snapshot, range)),
    };

    proto::Metric {
        name: metric.descriptor.name().to_owned(),
        description: metric.descriptor.description().to_owned(),
        unit: metric.descriptor.unit().to_owned(),
        data: Some(data),
    }
}

fn sum(snapshot: &CounterSnapshot, range: TimeRange) -> proto::Sum {
    let data_point = proto::NumberDataPoint {
        attributes: Vec::new(),
        start_time_unix_nano: range.start,
        time_unix_nano: range.end,
        flags: 0,
        value: Some(number_data_point::Value::AsDouble(snapshot.value)),
    };

    proto::Sum {
        data_points: vec![data_point],
        aggregation_temporality: AggregationTemporality::Delta as i32,
        is_monotonic: true,
    }
}

fn histogram(snapshot: &HistogramSnapshot, range: TimeRange) -> proto::Histogram {
    let data_point = proto::HistogramDataPoint {
        attributes: Vec::new(),
        start_time_unix_nano: range.start,
        time_unix_nano: range.end,
        count: snapshot.count,
        sum: Some(snapshot.sum),
        bucket_counts: snapshot.bucket_counts.clone(),
        explicit_bounds: snapshot.bounds.clone(),
        flags: 0,
        min: snapshot.min,
        max: snapshot.max,
    };

    proto::Histogram {
        data_points: vec![data_point],
        aggregation_temporality: AggregationTemporality::Delta as i32,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, UNIX_EPOCH},
    };

    use telemetry_pipeline::{
        data::{CounterSnapshot, HistogramSnapshot, Metric, MetricData, ScopeMetrics},
        ExportBatch, InstrumentDescriptor, InstrumentKind, InstrumentationScope, Resource,
    };

    use super::to_request;
    use crate::proto::{any_value, metric, number_data_point, AggregationTemporality};

    fn batch() -> ExportBatch {
        let resource =
            Resource::builder().with_service_name("test-hello-world-service").build().unwrap();
        let start = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let end = start + Duration::from_millis(1000);

        let metrics = vec![
            Metric {
                descriptor: InstrumentDescriptor::new(
                    "http_request_duration_milliseconds",
                    "Duration of HTTP requests in milliseconds",
                    "ms",
                    InstrumentKind::Histogram,
                ),
                data: MetricData::Histogram(HistogramSnapshot {
                    count: 3,
                    sum: 27.5,
                    min: Some(0.5),
                    max: Some(20.0),
                    bounds: vec![0.0, 5.0, 10.0],
                    bucket_counts: vec![0, 1, 1, 1],
                }),
            },
            Metric {
                descriptor: InstrumentDescriptor::new(
                    "http_requests_total",
                    "Total number of HTTP requests",
                    "",
                    InstrumentKind::Counter,
                ),
                data: MetricData::Counter(CounterSnapshot { value: 3.0 }),
            },
        ];

        let scope = InstrumentationScope::new("sample-app").with_version("0.1.2");
        ExportBatch::new(Arc::new(resource), start, end, vec![ScopeMetrics { scope, metrics }])
    }

    #[test]
    fn converts_batch() {
        let request = to_request(&batch());
        assert_eq!(request.resource_metrics.len(), 1);

        let resource_metrics = &request.resource_metrics[0];
        let resource = resource_metrics.resource.as_ref().unwrap();
        let service_name = resource.attributes.iter().find(|kv| kv.key == "service.name").unwrap();
        assert_eq!(
            service_name.value.as_ref().unwrap().value,
            Some(any_value::Value::StringValue("test-hello-world-service".to_owned()))
        );

        let scope_metrics = &resource_metrics.scope_metrics[0];
        let scope = scope_metrics.scope.as_ref().unwrap();
        assert_eq!(scope.name, "sample-app");
        assert_eq!(scope.version, "0.1.2");

        let start = 1_700_000_000 * 1_000_000_000u64;
        let end = start + 1_000_000_000;

        match &scope_metrics.metrics[0].data {
            Some(metric::Data::Histogram(histogram)) => {
                assert_eq!(histogram.aggregation_temporality, AggregationTemporality::Delta as i32);
                let point = &histogram.data_points[0];
                assert_eq!(point.count, 3);
                assert_eq!(point.sum, Some(27.5));
                assert_eq!(point.min, Some(0.5));
                assert_eq!(point.max, Some(20.0));
                assert_eq!(point.explicit_bounds, vec![0.0, 5.0, 10.0]);
                assert_eq!(point.bucket_counts, vec![0, 1, 1, 1]);
                assert_eq!(point.start_time_unix_nano, start);
                assert_eq!(point.time_unix_nano, end);
            }
            other => panic!("unexpected data: {other:?}"),
        }
        assert_eq!(scope_metrics.metrics[0].unit, "ms");

        match &scope_metrics.metrics[1].data {
            Some(metric::Data::Sum(sum)) => {
                assert!(sum.is_monotonic);
                assert_eq!(sum.aggregation_temporality, AggregationTemporality::Delta as i32);
                assert_eq!(sum.data_points[0].value, Some(number_data_point::Value::AsDouble(3.0)));
                assert_eq!(sum.data_points[0].start_time_unix_nano, start);
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn empty_histogram_has_no_min_max() {
        let mut batch_metrics = batch().scope_metrics().to_vec();
        batch_metrics[0].metrics[0].data = MetricData::Histogram(HistogramSnapshot {
            count: 0,
            sum: 0.0,
            min: None,
            max: None,
            bounds: vec![],
            bucket_counts: vec![0],
        });
        let batch =
            ExportBatch::new(Arc::new(Resource::default()), UNIX_EPOCH, UNIX_EPOCH, batch_metrics);

        let request = to_request(&batch);
        match &request.resource_metrics[0].scope_metrics[0].metrics[0].data {
            Some(metric::Data::Histogram(histogram)) => {
                assert_eq!(histogram.data_points[0].min, None);
                assert_eq!(histogram.data_points[0].max, None);
                assert_eq!(histogram.data_points[0].bucket_counts, vec![0]);
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }
}
