use std::fmt;

use thiserror::Error;

use crate::instrument::InstrumentKind;

/// Errors returned by instrument registration and recording.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MetricsError {
    /// An instrument with the same name but a different kind is already registered.
    #[error(
        "instrument `{name}` is already registered as a {existing}, cannot register it as a \
         {requested}"
    )]
    ConfigurationConflict {
        /// Name of the instrument.
        name: String,

        /// Kind of the instrument that was registered first.
        existing: InstrumentKind,

        /// Kind that was requested.
        requested: InstrumentKind,
    },

    /// A call was rejected because of an invalid argument. Aggregates are left untouched.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Details about the rejected value.
        reason: String,
    },
}

impl MetricsError {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        MetricsError::InvalidArgument { reason: reason.into() }
    }
}

/// Errors that could occur while building a metrics pipeline.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The resource attributes were not valid.
    #[error("invalid resource: {reason}")]
    InvalidResource {
        /// Details about the validation failure.
        reason: String,
    },

    /// A configuration value was not valid.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Details about the validation failure.
        reason: String,
    },

    /// Failed to spawn the background runtime or thread driving exports.
    #[error("failed to spawn background scheduler: {0}")]
    Backend(String),

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install recorder as global recorder")]
    FailedToInstall,
}

/// Category of a [`TransportError`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransportErrorKind {
    /// The connection to the collector could not be established.
    Connect,

    /// The export did not complete in time.
    Timeout,

    /// The collector answered with a non-success HTTP status.
    HttpStatus(u16),

    /// The collector answered with a non-OK gRPC status code.
    GrpcStatus(u32),

    /// The collector's response did not follow the expected protocol.
    Protocol,

    /// The batch could not be encoded.
    Encode,

    /// Any other failure.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connect => f.write_str("connect"),
            TransportErrorKind::Timeout => f.write_str("timeout"),
            TransportErrorKind::HttpStatus(status) => write!(f, "http status {status}"),
            TransportErrorKind::GrpcStatus(code) => write!(f, "grpc status {code}"),
            TransportErrorKind::Protocol => f.write_str("protocol"),
            TransportErrorKind::Encode => f.write_str("encode"),
            TransportErrorKind::Other => f.write_str("other"),
        }
    }
}

/// A failure to deliver a batch to the collector.
///
/// Transport errors never reach the recording API: the scheduler logs them and drops the affected
/// batch. Retryable errors are expected to clear up on their own (collector restarting, network
/// blip), while persistent errors point at a configuration problem.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportError {
    kind: TransportErrorKind,
    retryable: bool,
    message: String,
}

impl TransportError {
    /// Creates a new `TransportError`.
    pub fn new(kind: TransportErrorKind, retryable: bool, message: impl Into<String>) -> Self {
        TransportError { kind, retryable, message: message.into() }
    }

    /// Creates a retryable `TransportError`.
    pub fn retryable(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, true, message)
    }

    /// Creates a persistent `TransportError`.
    pub fn persistent(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, false, message)
    }

    /// Returns the kind of failure.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns `true` if the failure is transient.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Returns the failure details.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = if self.retryable { "retryable" } else { "persistent" };
        write!(f, "{} error ({}): {}", self.kind, severity, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Errors that could occur while shutting down a pipeline.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ShutdownError {
    /// The pipeline was already shut down.
    #[error("pipeline already shut down")]
    AlreadyShutdown,

    /// The final flush did not complete within the shutdown timeout, and pending data was
    /// discarded.
    #[error("final flush did not complete in time, pending data was discarded")]
    TimedOut,
}

/// Errors that could occur while force-flushing a pipeline.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FlushError {
    /// The pipeline is shut down.
    #[error("pipeline is shut down")]
    Shutdown,

    /// The flush did not complete in time.
    #[error("flush did not complete in time")]
    TimedOut,

    /// The exporter rejected the flushed batch.
    #[error("export failed: {0}")]
    Export(#[from] TransportError),
}
