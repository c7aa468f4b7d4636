use std::time::Duration;

use hyper::Uri;
use telemetry_pipeline::{MetricsPipeline, ResourceBuilder};
use thiserror::Error;

use crate::{
    config::{OtlpConfig, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT_MS},
    exporter::{HttpClient, OtlpExporter},
    grpc::EXPORT_PATH,
};

/// Errors that could occur while building an OTLP exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The collector endpoint could not be turned into a valid URI.
    #[error("invalid collector endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint {
        /// The endpoint as given.
        endpoint: String,

        /// Details about the parsing failure.
        reason: String,
    },

    /// No native root CA certificates could be loaded for TLS.
    #[error("failed to load native root CA certificates: {0}")]
    TlsRoots(String),

    /// The environment configuration could not be read.
    #[error("invalid configuration: {0}")]
    Configuration(#[source] Box<figment::Error>),

    /// The metrics pipeline could not be built.
    #[error(transparent)]
    Pipeline(#[from] telemetry_pipeline::BuildError),
}

/// Builder for an [`OtlpExporter`].
#[derive(Clone, Debug)]
pub struct OtlpExporterBuilder {
    endpoint: String,
    insecure: bool,
    timeout: Duration,
}

impl Default for OtlpExporterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OtlpExporterBuilder {
    /// Creates a new `OtlpExporterBuilder` with default settings.
    pub fn new() -> Self {
        OtlpExporterBuilder {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            insecure: true,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Creates a new `OtlpExporterBuilder` from the given configuration.
    pub fn from_config(config: &OtlpConfig) -> Self {
        OtlpExporterBuilder {
            endpoint: config.endpoint.clone(),
            insecure: config.insecure,
            timeout: config.timeout(),
        }
    }

    /// Sets the collector endpoint.
    ///
    /// Either a full URI (`http://collector:4317`, `https://collector:4317`), or a bare
    /// `host:port`, in which case the scheme is derived from
    /// [`with_insecure`][Self::with_insecure].
    ///
    /// Defaults to `otel-collector-1-collector:4317`.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets whether to use plaintext HTTP/2 for endpoints given without a scheme.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Sets the export timeout.
    ///
    /// The timeout bounds connecting, and is forwarded to the collector as the gRPC deadline.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the exporter.
    ///
    /// No connection is made until the first export.
    ///
    /// # Errors
    ///
    /// If the endpoint is not valid, or TLS is required and no root certificates could be loaded,
    /// an error will be returned.
    pub fn build(self) -> Result<OtlpExporter, BuildError> {
        let uri = export_uri(&self.endpoint, self.insecure)?;
        let client = if uri.scheme_str() == Some("https") {
            HttpClient::tls(self.timeout)?
        } else {
            HttpClient::plaintext(self.timeout)
        };

        Ok(OtlpExporter::new(client, uri, self.timeout))
    }
}

/// Turns a collector endpoint into the URI of the export method.
pub(crate) fn export_uri(endpoint: &str, insecure: bool) -> Result<Uri, BuildError> {
    let invalid =
        |reason: String| BuildError::InvalidEndpoint { endpoint: endpoint.to_owned(), reason };

    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(invalid("endpoint is empty".to_owned()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_owned()
    } else if insecure {
        format!("http://{trimmed}")
    } else {
        format!("https://{trimmed}")
    };

    let base = with_scheme.parse::<Uri>().map_err(|e| invalid(e.to_string()))?;
    match base.scheme_str() {
        Some("http" | "https") => {}
        Some(other) => return Err(invalid(format!("unsupported scheme `{other}`"))),
        None => return Err(invalid("missing scheme".to_owned())),
    }
    if base.authority().is_none() {
        return Err(invalid("missing host".to_owned()));
    }

    format!("{with_scheme}{EXPORT_PATH}").parse::<Uri>().map_err(|e| invalid(e.to_string()))
}

/// Builds a metrics pipeline exporting to an OTLP collector.
///
/// The exporter is configured from `config`, whose export timeout also bounds each export of the
/// pipeline. When `config` carries a service name, it overrides the one set on `resource`.
///
/// # Errors
///
/// If the exporter, the resource, or the pipeline could not be built, an error will be returned.
pub fn build_pipeline(
    config: &OtlpConfig,
    resource: ResourceBuilder,
) -> Result<MetricsPipeline, BuildError> {
    let exporter = OtlpExporterBuilder::from_config(config).build()?;

    let resource = match &config.service_name {
        Some(name) => resource.with_service_name(name.clone()),
        None => resource,
    };

    let pipeline = MetricsPipeline::builder(exporter)
        .with_resource(resource.build()?)
        .with_export_timeout(config.timeout())
        .build()?;

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::{export_uri, BuildError, OtlpExporterBuilder, EXPORT_PATH};

    #[test]
    fn endpoint_schemes() {
        let uri = export_uri("otel-collector-1-collector:4317", true).unwrap();
        assert_eq!(uri.scheme_str(), Some("http"));
        assert_eq!(uri.authority().unwrap().as_str(), "otel-collector-1-collector:4317");
        assert_eq!(uri.path(), EXPORT_PATH);

        let uri = export_uri("collector.example.com:4317", false).unwrap();
        assert_eq!(uri.scheme_str(), Some("https"));

        // An explicit scheme wins over the insecure flag.
        let uri = export_uri("https://collector.example.com:4317/", true).unwrap();
        assert_eq!(uri.scheme_str(), Some("https"));
        assert_eq!(uri.path(), EXPORT_PATH);
    }

    #[test]
    fn invalid_endpoints() {
        for endpoint in ["", "   ", "ftp://collector:21", "not a uri"] {
            let result = export_uri(endpoint, true);
            assert!(matches!(result, Err(BuildError::InvalidEndpoint { .. })), "{endpoint:?}");
        }
    }

    #[test]
    fn builds_plaintext_exporter() {
        let exporter = OtlpExporterBuilder::new().with_endpoint("127.0.0.1:4317").build().unwrap();
        assert_eq!(exporter.endpoint().scheme_str(), Some("http"));
    }
}
