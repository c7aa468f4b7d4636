//! In-process aggregation of counters and histograms, with periodic, batched export to a remote
//! collector.
//!
//! # Usage
//!
//! A [`MetricsPipeline`] is built around a [`MetricExporter`], which is responsible for delivering
//! batches to the collector. Instruments are created through a [`Meter`], and recording through
//! them is lock-free and never waits on the export side:
//!
//! ```no_run
//! # use telemetry_pipeline::{InMemoryExporter, MetricsPipeline, Resource};
//! let resource = Resource::builder()
//!     .with_service_name("test-hello-world-service")
//!     .build()
//!     .expect("invalid resource");
//!
//! let pipeline = MetricsPipeline::builder(InMemoryExporter::new())
//!     .with_resource(resource)
//!     .build()
//!     .expect("failed to build pipeline");
//!
//! let meter = pipeline.meter("sample-app", Some("0.1.2"));
//! let requests = meter
//!     .counter("http_requests_total")
//!     .with_description("Total number of HTTP requests")
//!     .build()
//!     .expect("conflicting instrument");
//! let durations = meter
//!     .histogram("http_request_duration_milliseconds")
//!     .with_description("Duration of HTTP requests in milliseconds")
//!     .with_unit("ms")
//!     .build()
//!     .expect("conflicting instrument");
//!
//! // On every request:
//! requests.add(1.0).expect("invalid delta");
//! durations.time(|| { /* handle the request */ });
//!
//! pipeline.shutdown().expect("failed to flush pending metrics");
//! ```
//!
//! # Export cycle
//!
//! A background thread collects every instrument at a fixed interval (one second by default),
//! and hands the resulting [`ExportBatch`] to the exporter. Aggregates use delta temporality: each
//! batch covers only what was recorded since the previous one, and successive batches cover
//! contiguous, non-overlapping time ranges.
//!
//! Delivery is best-effort. A batch the exporter fails to deliver is logged and dropped, and the
//! schedule carries on. When the exporter is slower than the export interval, collection waits for
//! it rather than queueing batches, so values keep accumulating in the aggregates.
//!
//! # `metrics` integration
//!
//! [`MetricsRecorder`] bridges the [`metrics`] facade onto a [`Meter`], so that `metrics::counter!`
//! and `metrics::histogram!` feed the same aggregates.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{
    MetricsPipelineBuilder, DEFAULT_EXPORT_INTERVAL, DEFAULT_EXPORT_TIMEOUT,
    DEFAULT_SHUTDOWN_TIMEOUT,
};

pub mod data;
pub use self::data::ExportBatch;

mod error;
pub use self::error::{
    BuildError, FlushError, MetricsError, ShutdownError, TransportError, TransportErrorKind,
};

pub mod exporter;
pub use self::exporter::{ExportAck, ExportFuture, InMemoryExporter, MetricExporter};

mod instrument;
pub use self::instrument::{Counter, Histogram, InstrumentDescriptor, InstrumentKind};

mod meter;
pub use self::meter::{CounterBuilder, HistogramBuilder, InstrumentationScope, Meter};

mod pipeline;
pub use self::pipeline::MetricsPipeline;

mod recorder;
pub use self::recorder::MetricsRecorder;

mod resource;
pub use self::resource::{AttributeValue, Resource, ResourceBuilder, SERVICE_NAME};

mod scheduler;
mod state;

mod storage;
pub use self::storage::DEFAULT_BOUNDARIES;
