//! gRPC-over-HTTP/2 plumbing.
use std::time::Duration;

use bytes::{BufMut as _, Bytes, BytesMut};
use hyper::{header::HeaderMap, StatusCode};
use percent_encoding::percent_decode;
use telemetry_pipeline::{TransportError, TransportErrorKind};

/// Request path of the OTLP metrics export method.
pub const EXPORT_PATH: &str = "/opentelemetry.proto.collector.metrics.v1.MetricsService/Export";

pub(crate) const CONTENT_TYPE_GRPC: &str = "application/grpc";
pub(crate) const GRPC_STATUS: &str = "grpc-status";
pub(crate) const GRPC_MESSAGE: &str = "grpc-message";
pub(crate) const GRPC_TIMEOUT: &str = "grpc-timeout";

const HEADER_LEN: usize = 5;

// Status codes that indicate a transient condition on the collector side.
const CANCELLED: u32 = 1;
const DEADLINE_EXCEEDED: u32 = 4;
const RESOURCE_EXHAUSTED: u32 = 8;
const ABORTED: u32 = 10;
const OUT_OF_RANGE: u32 = 11;
const UNAVAILABLE: u32 = 14;
const DATA_LOSS: u32 = 15;

/// Frames an encoded message as a single, uncompressed gRPC message.
pub(crate) fn encode_frame<M: prost::Message>(message: &M) -> Result<Bytes, TransportError> {
    let len = message.encoded_len();
    let prefix = u32::try_from(len).map_err(|_| {
        let message = format!("message too large to frame ({len} bytes)");
        TransportError::persistent(TransportErrorKind::Encode, message)
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + len);
    buf.put_u8(0);
    buf.put_u32(prefix);
    message
        .encode(&mut buf)
        .map_err(|e| TransportError::persistent(TransportErrorKind::Encode, e.to_string()))?;

    Ok(buf.freeze())
}

/// Extracts the single message of a gRPC response body.
///
/// Returns `None` if the body is empty, which is valid for messages with only default fields.
pub(crate) fn decode_frame(body: &[u8]) -> Result<Option<&[u8]>, TransportError> {
    if body.is_empty() {
        return Ok(None);
    }

    if body.len() < HEADER_LEN {
        return Err(protocol_error(format!("truncated message header ({} bytes)", body.len())));
    }

    if body[0] != 0 {
        return Err(protocol_error("compressed responses are not supported"));
    }

    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let message = &body[HEADER_LEN..];
    if message.len() != len {
        return Err(protocol_error(format!(
            "message length mismatch (header says {len} bytes, got {})",
            message.len()
        )));
    }

    Ok(Some(message))
}

/// Formats a `grpc-timeout` header value.
///
/// The value is limited to eight digits, so coarser units are used for long timeouts.
pub(crate) fn format_timeout(timeout: Duration) -> String {
    const MAX: u128 = 99_999_999;

    let millis = timeout.as_millis();
    if millis <= MAX {
        return format!("{millis}m");
    }

    let secs = timeout.as_secs();
    if u128::from(secs) <= MAX {
        return format!("{secs}S");
    }

    format!("{}H", (secs / 3600).min(MAX as u64))
}

/// Returns `true` if the given gRPC status code denotes a transient failure.
pub(crate) fn is_retryable_code(code: u32) -> bool {
    matches!(
        code,
        CANCELLED
            | DEADLINE_EXCEEDED
            | RESOURCE_EXHAUSTED
            | ABORTED
            | OUT_OF_RANGE
            | UNAVAILABLE
            | DATA_LOSS
    )
}

/// Maps a non-OK gRPC status to a transport error.
pub(crate) fn status_error(code: u32, message: Option<&str>) -> TransportError {
    let message = match message {
        Some(message) if !message.is_empty() => message.to_owned(),
        _ => "collector returned a non-OK status".to_owned(),
    };
    TransportError::new(TransportErrorKind::GrpcStatus(code), is_retryable_code(code), message)
}

/// Maps a non-200 HTTP status to a transport error.
pub(crate) fn http_status_error(status: StatusCode) -> TransportError {
    let retryable = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    );
    let reason = status.canonical_reason().unwrap_or_else(|| status.as_str());
    TransportError::new(
        TransportErrorKind::HttpStatus(status.as_u16()),
        retryable,
        format!("unexpected HTTP status from collector: {reason}"),
    )
}

/// Reads the gRPC status code and message from a header map.
///
/// The message is percent-decoded. Returns `None` if the map carries no `grpc-status` entry.
pub(crate) fn read_status(
    headers: &HeaderMap,
) -> Result<Option<(u32, Option<String>)>, TransportError> {
    let Some(status) = headers.get(GRPC_STATUS) else {
        return Ok(None);
    };

    let code = status
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .ok_or_else(|| protocol_error(format!("invalid grpc-status value: {status:?}")))?;
    let message = headers
        .get(GRPC_MESSAGE)
        .map(|v| percent_decode(v.as_bytes()).decode_utf8_lossy().into_owned());

    Ok(Some((code, message)))
}

pub(crate) fn protocol_error(message: impl Into<String>) -> TransportError {
    TransportError::persistent(TransportErrorKind::Protocol, message)
}
