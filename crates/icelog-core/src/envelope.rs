//! Wire envelope for telemetry payloads on the message log.
//!
//! The HTTP ingester wraps every accepted OTLP request into a
//! `RawTelemetryMessage` before producing it, preserving the original
//! content type so the appender can decode protobuf and JSON payloads alike.

use crate::error::TransformError;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use prost::Message;

/// Accepted content types for OTLP payloads.
pub const PROTOBUF_CONTENT_TYPES: [&str; 2] = ["application/x-protobuf", "application/protobuf"];
pub const JSON_CONTENT_TYPES: [&str; 2] = ["application/json", "text/json"];

/// Framed telemetry message as produced by the ingester.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RawTelemetryMessage {
    /// Original HTTP content type of the payload
    #[prost(string, tag = "1")]
    pub content_type: ::prost::alloc::string::String,

    /// Kind of telemetry carried in the payload
    #[prost(enumeration = "TelemetryType", tag = "2")]
    pub telemetry_type: i32,

    /// The OTLP payload, already gzip-decompressed by the ingester
    #[prost(bytes = "vec", tag = "3")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}

/// Telemetry kinds. Only logs are handled today; the rest are reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TelemetryType {
    Unspecified = 0,
    OtelLogs = 1,
    OtelMetrics = 2,
    OtelTraces = 3,
}

impl RawTelemetryMessage {
    /// Wrap an OTLP logs request for publication.
    pub fn logs(content_type: &str, payload: Vec<u8>) -> Self {
        Self {
            content_type: content_type.to_string(),
            telemetry_type: TelemetryType::OtelLogs as i32,
            payload,
        }
    }
}

/// Decode the envelope from a raw Kafka payload.
pub fn decode_envelope(payload: &[u8]) -> Result<RawTelemetryMessage, TransformError> {
    RawTelemetryMessage::decode(payload).map_err(|e| TransformError::EnvelopeDecode(e.to_string()))
}

/// Decode the OTLP logs request carried by an envelope.
///
/// Rejects non-log telemetry and content types outside the whitelist; both
/// are producer faults that route to the dead letter queue.
pub fn decode_logs_request(
    envelope: &RawTelemetryMessage,
) -> Result<ExportLogsServiceRequest, TransformError> {
    if envelope.telemetry_type != TelemetryType::OtelLogs as i32 {
        return Err(TransformError::UnsupportedTelemetryType(
            envelope.telemetry_type,
        ));
    }

    let content_type = normalize_content_type(&envelope.content_type);

    if PROTOBUF_CONTENT_TYPES.contains(&content_type.as_str()) {
        ExportLogsServiceRequest::decode(envelope.payload.as_slice())
            .map_err(|e| TransformError::PayloadDecode(e.to_string()))
    } else if JSON_CONTENT_TYPES.contains(&content_type.as_str()) {
        serde_json::from_slice(&envelope.payload)
            .map_err(|e| TransformError::PayloadDecode(e.to_string()))
    } else {
        Err(TransformError::UnsupportedContentType(
            envelope.content_type.clone(),
        ))
    }
}

/// Lowercase, trim, and strip any `;charset=...` style parameters.
fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
