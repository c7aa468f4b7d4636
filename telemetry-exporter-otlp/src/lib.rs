//! An OTLP exporter for [`telemetry_pipeline`], pushing metrics to an OpenTelemetry collector over
//! gRPC.
//!
//! # Usage
//!
//! The exporter is usually configured from the environment, and installed into a pipeline in one
//! go with [`build_pipeline`]:
//!
//! ```no_run
//! # use telemetry_exporter_otlp::{build_pipeline, OtlpConfig};
//! # use telemetry_pipeline::Resource;
//! let config = OtlpConfig::from_env().expect("invalid exporter configuration");
//! let resource = Resource::builder().with_service_name("test-hello-world-service");
//! let pipeline = build_pipeline(&config, resource).expect("failed to build pipeline");
//!
//! let meter = pipeline.meter("sample-app", Some("0.1.2"));
//! # drop(meter);
//! ```
//!
//! [`OtlpExporterBuilder`] builds a bare [`OtlpExporter`] for use with
//! [`MetricsPipeline::builder`][telemetry_pipeline::MetricsPipeline::builder].
//!
//! # Transport
//!
//! Each batch is sent as one unary `MetricsService/Export` call, over plaintext HTTP/2 when the
//! endpoint uses `http`, and over TLS (validated against the platform's root certificates) when it
//! uses `https`. Failures are classified as retryable or persistent from the gRPC status or HTTP
//! status the collector responds with; connection failures are always retryable.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{build_pipeline, BuildError, OtlpExporterBuilder};

mod config;
pub use self::config::{OtlpConfig, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT_MS};

mod exporter;
pub use self::exporter::OtlpExporter;

mod grpc;
pub use self::grpc::EXPORT_PATH;

#[allow(missing_docs)]
pub mod proto;

mod transform;
