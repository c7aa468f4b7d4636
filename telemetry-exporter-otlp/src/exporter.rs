use std::{fmt, time::Duration};

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::{
    body::Incoming,
    header::{CONTENT_TYPE, TE, USER_AGENT},
    Method, Request, Response, StatusCode, Uri,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use prost::Message as _;
use telemetry_pipeline::{
    ExportAck, ExportBatch, ExportFuture, MetricExporter, TransportError, TransportErrorKind,
};
use tracing::{debug, trace};

use crate::{
    builder::BuildError,
    grpc::{self, CONTENT_TYPE_GRPC, GRPC_TIMEOUT},
    proto::ExportMetricsServiceResponse,
    transform,
};

const USER_AGENT_VALUE: &str = concat!("telemetry-exporter-otlp/", env!("CARGO_PKG_VERSION"));

/// HTTP/2 client, either plaintext (prior knowledge) or over TLS.
pub(crate) enum HttpClient {
    Plaintext(Client<HttpConnector, Full<Bytes>>),
    Tls(Client<HttpsConnector<HttpConnector>, Full<Bytes>>),
}

impl HttpClient {
    pub fn plaintext(connect_timeout: Duration) -> Self {
        let connector = http_connector(connect_timeout);
        let client = Client::builder(TokioExecutor::new()).http2_only(true).build(connector);
        HttpClient::Plaintext(client)
    }

    pub fn tls(connect_timeout: Duration) -> Result<Self, BuildError> {
        let mut connector = http_connector(connect_timeout);
        connector.enforce_http(false);

        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| BuildError::TlsRoots(e.to_string()))?
            .https_only()
            .enable_http2()
            .wrap_connector(connector);
        let client = Client::builder(TokioExecutor::new()).http2_only(true).build(https);
        Ok(HttpClient::Tls(client))
    }

    async fn request(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, TransportError> {
        let result = match self {
            HttpClient::Plaintext(client) => client.request(request).await,
            HttpClient::Tls(client) => client.request(request).await,
        };

        result.map_err(|e| {
            let kind = if e.is_connect() {
                TransportErrorKind::Connect
            } else {
                TransportErrorKind::Other
            };
            TransportError::retryable(kind, format!("{e:?}"))
        })
    }
}

fn http_connector(connect_timeout: Duration) -> HttpConnector {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_nodelay(true);
    connector
}

/// Exports batches to an OTLP collector over gRPC.
///
/// Each batch is sent as a single `MetricsService/Export` call. The exporter does not retry on its
/// own: failures are reported to the pipeline, which drops the batch and carries on.
pub struct OtlpExporter {
    client: HttpClient,
    endpoint: Uri,
    timeout: Duration,
}

impl OtlpExporter {
    pub(crate) fn new(client: HttpClient, endpoint: Uri, timeout: Duration) -> Self {
        OtlpExporter { client, endpoint, timeout }
    }

    /// Returns the URI of the export method.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    async fn send(&self, batch: ExportBatch) -> Result<ExportAck, TransportError> {
        let request = transform::to_request(&batch);
        let frame = grpc::encode_frame(&request)?;
        let body_len = frame.len();

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, CONTENT_TYPE_GRPC)
            .header(TE, "trailers")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(GRPC_TIMEOUT, grpc::format_timeout(self.timeout))
            .body(Full::new(frame))
            .map_err(|e| TransportError::persistent(TransportErrorKind::Encode, e.to_string()))?;

        trace!(endpoint = %self.endpoint, body_len, "Sending export request.");
        let response = self.client.request(request).await?;

        let (parts, body) = response.into_parts();
        if parts.status != StatusCode::OK {
            return Err(grpc::http_status_error(parts.status));
        }

        let content_type =
            parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
        if !content_type.starts_with(CONTENT_TYPE_GRPC) {
            return Err(grpc::protocol_error(format!("unexpected content type `{content_type}`")));
        }

        // Trailers-only responses carry the status in the headers, and have no body.
        if let Some((code, message)) = grpc::read_status(&parts.headers)? {
            if code != 0 {
                return Err(grpc::status_error(code, message.as_deref()));
            }
        }

        let collected = body.collect().await.map_err(|e| {
            let message = format!("failed to read response body: {e}");
            TransportError::retryable(TransportErrorKind::Other, message)
        })?;
        let status = match collected.trailers() {
            Some(trailers) => grpc::read_status(trailers)?,
            None => None,
        };
        let status = match status {
            Some(status) => status,
            None => grpc::read_status(&parts.headers)?
                .ok_or_else(|| grpc::protocol_error("response carried no grpc-status"))?,
        };

        let (code, message) = status;
        if code != 0 {
            return Err(grpc::status_error(code, message.as_deref()));
        }

        let body = collected.to_bytes();
        let response = match grpc::decode_frame(&body)? {
            Some(message) => ExportMetricsServiceResponse::decode(message)
                .map_err(|e| grpc::protocol_error(format!("invalid response message: {e}")))?,
            None => ExportMetricsServiceResponse::default(),
        };

        let ack = match response.partial_success {
            Some(partial) => ExportAck {
                rejected_data_points: partial.rejected_data_points,
                message: (!partial.error_message.is_empty()).then_some(partial.error_message),
            },
            None => ExportAck::default(),
        };

        debug!(
            data_points = batch.data_point_count(),
            rejected = ack.rejected_data_points,
            "Exported batch."
        );
        Ok(ack)
    }
}

impl MetricExporter for OtlpExporter {
    fn export(&self, batch: ExportBatch) -> ExportFuture<'_> {
        Box::pin(self.send(batch))
    }
}

impl fmt::Debug for OtlpExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = match self.client {
            HttpClient::Plaintext(_) => "h2c",
            HttpClient::Tls(_) => "h2",
        };

        f.debug_struct("OtlpExporter")
            .field("endpoint", &self.endpoint)
            .field("transport", &transport)
            .field("timeout", &self.timeout)
            .finish()
    }
}
