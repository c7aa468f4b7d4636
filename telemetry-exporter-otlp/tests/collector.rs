use std::{
    convert::Infallible,
    net::SocketAddr,
    pin::Pin,
    sync::{mpsc, Arc, Mutex},
    task::{Context, Poll},
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use http_body_util::BodyExt as _;
use hyper::{
    body::{Body, Frame, Incoming},
    header::HeaderMap,
    server::conn::http2,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use prost::Message as _;
use telemetry_exporter_otlp::{
    build_pipeline,
    proto::{
        metric, number_data_point, ExportMetricsPartialSuccess, ExportMetricsServiceRequest,
        ExportMetricsServiceResponse,
    },
    OtlpConfig, OtlpExporterBuilder, EXPORT_PATH,
};
use telemetry_pipeline::{
    data::{CounterSnapshot, Metric, MetricData, ScopeMetrics},
    ExportBatch, FlushError, InstrumentDescriptor, InstrumentKind, InstrumentationScope,
    MetricExporter, MetricsPipeline, Resource, TransportErrorKind,
};
use tokio::{net::TcpListener, runtime::Runtime};

#[derive(Clone)]
enum Reply {
    /// Response message, with `grpc-status: 0` in the headers.
    Accept { rejected_data_points: i64, message: &'static str },
    /// Response message, followed by the status in HTTP/2 trailers.
    AcceptWithTrailers,
    /// Trailers-only response carrying a non-OK status.
    GrpcStatus { code: u32, message: &'static str },
    /// Empty body, followed by a non-OK status in HTTP/2 trailers.
    GrpcStatusTrailers { code: u32, message: &'static str },
    HttpStatus(StatusCode),
}

/// Response body made of at most one data frame and one trailers frame.
struct ReplyBody {
    data: Option<Bytes>,
    trailers: Option<HeaderMap>,
}

impl ReplyBody {
    fn empty() -> Self {
        ReplyBody { data: None, trailers: None }
    }

    fn data(data: Bytes) -> Self {
        ReplyBody { data: Some(data), trailers: None }
    }

    fn with_status(mut self, code: u32, message: &str) -> Self {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", code.to_string().parse().unwrap());
        if !message.is_empty() {
            trailers.insert("grpc-message", message.parse().unwrap());
        }
        self.trailers = Some(trailers);
        self
    }
}

impl Body for ReplyBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        if let Some(data) = self.data.take() {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }

        Poll::Ready(self.trailers.take().map(|trailers| Ok(Frame::trailers(trailers))))
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none() && self.trailers.is_none()
    }
}

fn response_frame(rejected_data_points: i64, message: &str) -> Bytes {
    let partial_success = (rejected_data_points != 0).then(|| ExportMetricsPartialSuccess {
        rejected_data_points,
        error_message: message.to_owned(),
    });
    let message = ExportMetricsServiceResponse { partial_success }.encode_to_vec();

    let mut frame = vec![0];
    frame.extend_from_slice(&(message.len() as u32).to_be_bytes());
    frame.extend_from_slice(&message);
    Bytes::from(frame)
}

struct Received {
    path: String,
    grpc_timeout: Option<String>,
    request: ExportMetricsServiceRequest,
}

struct State {
    reply: Mutex<Reply>,
    received: Mutex<mpsc::Sender<Received>>,
}

/// A minimal gRPC collector, serving plaintext HTTP/2.
struct FakeCollector {
    runtime: Runtime,
    addr: SocketAddr,
    state: Arc<State>,
    received: mpsc::Receiver<Received>,
}

impl FakeCollector {
    fn start(reply: Reply) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, received) = mpsc::channel();
        let state = Arc::new(State { reply: Mutex::new(reply), received: Mutex::new(tx) });

        let server_state = Arc::clone(&state);
        runtime.spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { continue };
                let state = Arc::clone(&server_state);
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(req, Arc::clone(&state)));
                    let _ = http2::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        FakeCollector { runtime, addr, state, received }
    }

    fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn set_reply(&self, reply: Reply) {
        *self.state.reply.lock().unwrap() = reply;
    }

    fn next_request(&self) -> Received {
        self.received.recv_timeout(Duration::from_secs(5)).expect("collector received no request")
    }
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<State>,
) -> Result<Response<ReplyBody>, Infallible> {
    let path = req.uri().path().to_owned();
    let grpc_timeout =
        req.headers().get("grpc-timeout").and_then(|v| v.to_str().ok()).map(str::to_owned);
    let body = req.into_body().collect().await.unwrap().to_bytes();

    assert_eq!(body[0], 0, "compressed request");
    let request = ExportMetricsServiceRequest::decode(&body[5..]).unwrap();
    let _ = state.received.lock().unwrap().send(Received { path, grpc_timeout, request });

    let grpc = || Response::builder().header("content-type", "application/grpc");
    let reply = state.reply.lock().unwrap().clone();
    let response = match reply {
        Reply::Accept { rejected_data_points, message } => grpc()
            .header("grpc-status", "0")
            .body(ReplyBody::data(response_frame(rejected_data_points, message))),
        Reply::AcceptWithTrailers => {
            grpc().body(ReplyBody::data(response_frame(0, "")).with_status(0, ""))
        }
        Reply::GrpcStatus { code, message } => grpc()
            .header("grpc-status", code.to_string())
            .header("grpc-message", message)
            .body(ReplyBody::empty()),
        Reply::GrpcStatusTrailers { code, message } => {
            grpc().body(ReplyBody::empty().with_status(code, message))
        }
        Reply::HttpStatus(status) => Response::builder().status(status).body(ReplyBody::empty()),
    };

    Ok(response.unwrap())
}

fn batch(value: f64) -> ExportBatch {
    let resource =
        Resource::builder().with_service_name("test-hello-world-service").build().unwrap();
    let end = SystemTime::now();
    let metric = Metric {
        descriptor: InstrumentDescriptor::new(
            "http_requests_total",
            "Total number of HTTP requests",
            "",
            InstrumentKind::Counter,
        ),
        data: MetricData::Counter(CounterSnapshot { value }),
    };
    let scope_metrics =
        ScopeMetrics { scope: InstrumentationScope::new("sample-app"), metrics: vec![metric] };

    ExportBatch::new(Arc::new(resource), end - Duration::from_secs(1), end, vec![scope_metrics])
}

fn counter_value(request: &ExportMetricsServiceRequest, name: &str) -> Option<f64> {
    request
        .resource_metrics
        .iter()
        .flat_map(|rm| &rm.scope_metrics)
        .flat_map(|sm| &sm.metrics)
        .find_map(|m| match (&m.name, &m.data) {
            (n, Some(metric::Data::Sum(sum))) if n == name => match sum.data_points[0].value {
                Some(number_data_point::Value::AsDouble(value)) => Some(value),
                _ => None,
            },
            _ => None,
        })
}

#[test]
fn exports_batch_to_collector() {
    let collector = FakeCollector::start(Reply::Accept { rejected_data_points: 0, message: "" });
    let exporter = OtlpExporterBuilder::new()
        .with_endpoint(collector.endpoint())
        .with_timeout(Duration::from_secs(2))
        .build()
        .unwrap();

    let ack = collector.runtime.block_on(exporter.export(batch(3.0))).unwrap();
    assert!(ack.is_full_success());

    let received = collector.next_request();
    assert_eq!(received.path, EXPORT_PATH);
    assert_eq!(received.grpc_timeout.as_deref(), Some("2000m"));
    assert_eq!(counter_value(&received.request, "http_requests_total"), Some(3.0));
}

#[test]
fn reports_partial_success() {
    let collector = FakeCollector::start(Reply::Accept {
        rejected_data_points: 2,
        message: "invalid data points",
    });
    let exporter = OtlpExporterBuilder::new().with_endpoint(collector.endpoint()).build().unwrap();

    let ack = collector.runtime.block_on(exporter.export(batch(1.0))).unwrap();
    assert!(!ack.is_full_success());
    assert_eq!(ack.rejected_data_points, 2);
    assert_eq!(ack.message.as_deref(), Some("invalid data points"));
}

#[test]
fn reads_status_from_trailers() {
    let collector = FakeCollector::start(Reply::AcceptWithTrailers);
    let exporter = OtlpExporterBuilder::new().with_endpoint(collector.endpoint()).build().unwrap();

    let ack = collector.runtime.block_on(exporter.export(batch(2.0))).unwrap();
    assert!(ack.is_full_success());
    assert_eq!(counter_value(&collector.next_request().request, "http_requests_total"), Some(2.0));

    collector.set_reply(Reply::GrpcStatusTrailers { code: 14, message: "Service%20unavailable" });
    let error = collector.runtime.block_on(exporter.export(batch(2.0))).unwrap_err();
    assert_eq!(error.kind(), TransportErrorKind::GrpcStatus(14));
    assert!(error.is_retryable());
    assert_eq!(error.message(), "Service unavailable");

    collector.set_reply(Reply::GrpcStatusTrailers { code: 7, message: "permission denied" });
    let error = collector.runtime.block_on(exporter.export(batch(2.0))).unwrap_err();
    assert_eq!(error.kind(), TransportErrorKind::GrpcStatus(7));
    assert!(!error.is_retryable());
}

#[test]
fn classifies_grpc_status() {
    let collector =
        FakeCollector::start(Reply::GrpcStatus { code: 14, message: "collector restarting" });
    let exporter = OtlpExporterBuilder::new().with_endpoint(collector.endpoint()).build().unwrap();

    let error = collector.runtime.block_on(exporter.export(batch(1.0))).unwrap_err();
    assert_eq!(error.kind(), TransportErrorKind::GrpcStatus(14));
    assert!(error.is_retryable());
    assert_eq!(error.message(), "collector restarting");

    collector.set_reply(Reply::GrpcStatus { code: 12, message: "unknown service" });
    let error = collector.runtime.block_on(exporter.export(batch(1.0))).unwrap_err();
    assert_eq!(error.kind(), TransportErrorKind::GrpcStatus(12));
    assert!(!error.is_retryable());

    collector.set_reply(Reply::HttpStatus(StatusCode::SERVICE_UNAVAILABLE));
    let error = collector.runtime.block_on(exporter.export(batch(1.0))).unwrap_err();
    assert_eq!(error.kind(), TransportErrorKind::HttpStatus(503));
    assert!(error.is_retryable());
}

#[test]
fn connection_refused_is_retryable() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let exporter = OtlpExporterBuilder::new()
        .with_endpoint(format!("http://{addr}"))
        .with_timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    let error = runtime.block_on(exporter.export(batch(1.0))).unwrap_err();
    assert_eq!(error.kind(), TransportErrorKind::Connect);
    assert!(error.is_retryable());
}

#[test]
fn pipeline_flushes_to_collector() {
    let collector = FakeCollector::start(Reply::Accept { rejected_data_points: 0, message: "" });
    let config = OtlpConfig {
        endpoint: collector.addr.to_string(),
        insecure: true,
        timeout_ms: 2000,
        service_name: Some("test-hello-world-service".to_owned()),
    };

    let resource = Resource::builder().with_service_name("overridden");
    let pipeline = build_pipeline(&config, resource).unwrap();
    assert_eq!(pipeline.resource().service_name(), Some("test-hello-world-service"));

    let meter = pipeline.meter("sample-app", Some("0.1.2"));
    let requests =
        meter.create_counter("http_requests_total", "Total number of HTTP requests").unwrap();
    requests.add(4.0).unwrap();

    pipeline.force_flush().unwrap();
    let received = collector.next_request();
    assert_eq!(counter_value(&received.request, "http_requests_total"), Some(4.0));

    let scope_metrics = &received.request.resource_metrics[0].scope_metrics[0];
    assert_eq!(scope_metrics.scope.as_ref().unwrap().name, "sample-app");
    assert_eq!(scope_metrics.scope.as_ref().unwrap().version, "0.1.2");

    collector.set_reply(Reply::GrpcStatus { code: 3, message: "invalid argument" });
    match pipeline.force_flush() {
        Err(FlushError::Export(error)) => {
            assert_eq!(error.kind(), TransportErrorKind::GrpcStatus(3));
            assert!(!error.is_retryable());
        }
        other => panic!("unexpected flush result: {other:?}"),
    }

    collector.set_reply(Reply::Accept { rejected_data_points: 0, message: "" });
    pipeline.shutdown().unwrap();
}

#[test]
fn shutdown_with_unreachable_collector_is_bounded() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let exporter = OtlpExporterBuilder::new()
        .with_endpoint(format!("http://{addr}"))
        .with_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    let pipeline = MetricsPipeline::builder(exporter)
        .with_export_timeout(Duration::from_millis(500))
        .with_shutdown_timeout(Duration::from_secs(2))
        .build()
        .unwrap();

    let requests = pipeline.meter("sample-app", None).create_counter("http_requests_total", "");
    requests.unwrap().add(1.0).unwrap();

    let started = std::time::Instant::now();
    let _ = pipeline.shutdown();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(pipeline.is_shutdown());
}
