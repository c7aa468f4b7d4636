use std::time::Duration;

use figment::{providers::Env, Figment};
use serde::Deserialize;

use crate::BuildError;

/// Default collector address.
pub const DEFAULT_ENDPOINT: &str = "otel-collector-1-collector:4317";

/// Default export timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

const ENV_KEYS: &[&str] = &[
    "OTEL_COLLECTOR_ENDPOINT",
    "OTEL_EXPORTER_OTLP_INSECURE",
    "OTEL_EXPORTER_OTLP_TIMEOUT",
    "OTEL_SERVICE_NAME",
];

/// Exporter settings, as read from the environment.
///
/// | Variable                      | Field          | Default                           |
/// |-------------------------------|----------------|-----------------------------------|
/// | `OTEL_COLLECTOR_ENDPOINT`     | `endpoint`     | `otel-collector-1-collector:4317` |
/// | `OTEL_EXPORTER_OTLP_INSECURE` | `insecure`     | `true`                            |
/// | `OTEL_EXPORTER_OTLP_TIMEOUT`  | `timeout_ms`   | `10000`                           |
/// | `OTEL_SERVICE_NAME`           | `service_name` | unset                             |
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtlpConfig {
    /// Collector address.
    ///
    /// When no scheme is given, `http://` is assumed in insecure mode, and `https://` otherwise.
    #[serde(rename = "otel_collector_endpoint")]
    pub endpoint: String,

    /// Whether to talk to the collector over plaintext HTTP/2.
    #[serde(rename = "otel_exporter_otlp_insecure")]
    pub insecure: bool,

    /// Export timeout, in milliseconds.
    #[serde(rename = "otel_exporter_otlp_timeout")]
    pub timeout_ms: u64,

    /// Overrides the `service.name` resource attribute.
    #[serde(rename = "otel_service_name")]
    pub service_name: Option<String>,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        OtlpConfig {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            insecure: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            service_name: None,
        }
    }
}

impl OtlpConfig {
    /// Returns the figment this configuration is extracted from.
    ///
    /// Only the variables listed on [`OtlpConfig`] are read.
    pub fn figment() -> Figment {
        Figment::new().merge(Env::raw().only(ENV_KEYS))
    }

    /// Reads the configuration from the environment.
    ///
    /// # Errors
    ///
    /// If a variable is set to a value of the wrong type, or the timeout is zero, an error will be
    /// returned.
    pub fn from_env() -> Result<Self, BuildError> {
        let config: OtlpConfig =
            Self::figment().extract().map_err(|e| BuildError::Configuration(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the export timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.timeout_ms == 0 {
            return Err(BuildError::Configuration(Box::new(figment::Error::from(
                "OTEL_EXPORTER_OTLP_TIMEOUT must be greater than zero".to_owned(),
            ))));
        }

        Ok(())
    }
}
