use std::{thread, time::Duration};

use telemetry_exporter_otlp::{build_pipeline, OtlpConfig};
use telemetry_pipeline::Resource;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = OtlpConfig::from_env().expect("invalid exporter configuration");
    info!(endpoint = %config.endpoint, "Exporting metrics.");

    let resource = Resource::builder().with_service_name("test-hello-world-service");
    let pipeline = build_pipeline(&config, resource).expect("failed to build pipeline");

    let meter = pipeline.meter("sample-app", Some("0.1.2"));
    let requests = meter
        .counter("http_requests_total")
        .with_description("Total number of HTTP requests")
        .build()
        .expect("conflicting instrument");
    let durations = meter
        .histogram("http_request_duration_milliseconds")
        .with_description("Duration of HTTP requests in milliseconds")
        .with_unit("ms")
        .build()
        .expect("conflicting instrument");

    for i in 0..50u64 {
        durations.time(|| thread::sleep(Duration::from_millis(5 + (i * 37) % 90)));
        requests.add(1.0).expect("invalid delta");
    }

    pipeline.shutdown().expect("failed to flush pending metrics");
}
