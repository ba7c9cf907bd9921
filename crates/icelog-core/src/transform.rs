//! OTLP log record transformation.
//!
//! Flattens an `ExportLogsServiceRequest` into rows of the persisted log
//! schema. Well-known resource attributes get their own columns; everything
//! else lands in the `attributes` map, with log-record attributes winning
//! over resource attributes on key collision.

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::logs::v1::LogRecord as OtlpLogRecord;
use opentelemetry_proto::tonic::resource::v1::Resource;
use std::collections::BTreeMap;

/// Resource attributes promoted to dedicated columns.
const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";
const ATTR_HOST_NAME: &str = "host.name";

/// One row of the persisted log table.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Source Kafka topic
    pub kafka_topic: String,
    /// Source Kafka partition
    pub kafka_partition: i32,
    /// Source Kafka offset
    pub kafka_offset: i64,
    /// Event time (microsecond precision once persisted)
    pub timestamp: DateTime<Utc>,
    /// Severity text
    pub severity: String,
    /// Rendered body
    pub body: String,
    /// Lowercase hex trace id, empty when absent
    pub trace_id: String,
    /// Lowercase hex span id, empty when absent
    pub span_id: String,
    /// `service.name` resource attribute
    pub service_name: String,
    /// `deployment.environment` resource attribute
    pub deployment_environment: String,
    /// `host.name` resource attribute
    pub host_name: String,
    /// Remaining attributes, ordered by key
    pub attributes: BTreeMap<String, String>,
}

impl LogRecord {
    /// Cheap upper bound on the in-memory size of this record.
    ///
    /// Only feeds the flush triggers; accuracy is not required.
    pub fn estimated_size(&self) -> usize {
        let mut size = self.kafka_topic.len()
            + std::mem::size_of::<i32>()
            + std::mem::size_of::<i64>()
            + self.severity.len()
            + self.body.len()
            + self.trace_id.len()
            + self.span_id.len()
            + self.service_name.len()
            + self.deployment_environment.len()
            + self.host_name.len();
        for (key, value) in &self.attributes {
            size += key.len() + value.len();
        }
        size + 100
    }
}

/// Transform an OTLP logs export request into persisted rows.
///
/// Every emitted row carries the Kafka coordinates of the message the
/// request arrived in. A request with no log records yields an empty vec.
pub fn transform(
    request: &ExportLogsServiceRequest,
    topic: &str,
    partition: i32,
    offset: i64,
) -> Vec<LogRecord> {
    let mut records = Vec::new();

    for resource_logs in &request.resource_logs {
        let resource = resource_logs.resource.as_ref();
        let (service_name, deployment_environment, host_name) = well_known_attributes(resource);

        for scope_logs in &resource_logs.scope_logs {
            for log_record in &scope_logs.log_records {
                records.push(LogRecord {
                    kafka_topic: topic.to_string(),
                    kafka_partition: partition,
                    kafka_offset: offset,
                    timestamp: record_timestamp(log_record),
                    severity: severity_text(log_record),
                    body: log_record
                        .body
                        .as_ref()
                        .map(render_any_value)
                        .unwrap_or_default(),
                    trace_id: bytes_to_hex(&log_record.trace_id),
                    span_id: bytes_to_hex(&log_record.span_id),
                    service_name: service_name.clone(),
                    deployment_environment: deployment_environment.clone(),
                    host_name: host_name.clone(),
                    attributes: merged_attributes(resource, &log_record.attributes),
                });
            }
        }
    }

    records
}

/// Render an OTLP `AnyValue` as a flat string.
pub fn render_any_value(value: &AnyValue) -> String {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => s.clone(),
        Some(any_value::Value::BoolValue(b)) => b.to_string(),
        Some(any_value::Value::IntValue(i)) => i.to_string(),
        Some(any_value::Value::DoubleValue(d)) => d.to_string(),
        Some(any_value::Value::BytesValue(b)) => bytes_to_hex(b),
        Some(any_value::Value::ArrayValue(array)) => array
            .values
            .iter()
            .map(render_any_value)
            .collect::<Vec<_>>()
            .join(","),
        Some(any_value::Value::KvlistValue(kvlist)) => kvlist
            .values
            .iter()
            .map(|kv| format!("{}={}", kv.key, render_key_value(kv)))
            .collect::<Vec<_>>()
            .join(","),
        None => String::new(),
    }
}

fn render_key_value(kv: &KeyValue) -> String {
    kv.value.as_ref().map(render_any_value).unwrap_or_default()
}

fn well_known_attributes(resource: Option<&Resource>) -> (String, String, String) {
    let mut service_name = String::new();
    let mut deployment_environment = String::new();
    let mut host_name = String::new();

    if let Some(resource) = resource {
        for attr in &resource.attributes {
            match attr.key.as_str() {
                ATTR_SERVICE_NAME => service_name = render_key_value(attr),
                ATTR_DEPLOYMENT_ENVIRONMENT => deployment_environment = render_key_value(attr),
                ATTR_HOST_NAME => host_name = render_key_value(attr),
                _ => {}
            }
        }
    }

    (service_name, deployment_environment, host_name)
}

fn merged_attributes(
    resource: Option<&Resource>,
    record_attrs: &[KeyValue],
) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();

    if let Some(resource) = resource {
        for attr in &resource.attributes {
            if matches!(
                attr.key.as_str(),
                ATTR_SERVICE_NAME | ATTR_DEPLOYMENT_ENVIRONMENT | ATTR_HOST_NAME
            ) {
                continue;
            }
            attributes.insert(attr.key.clone(), render_key_value(attr));
        }
    }

    // Record attributes win on collision
    for attr in record_attrs {
        attributes.insert(attr.key.clone(), render_key_value(attr));
    }

    attributes
}

fn record_timestamp(record: &OtlpLogRecord) -> DateTime<Utc> {
    let nanos = if record.time_unix_nano > 0 {
        record.time_unix_nano
    } else {
        record.observed_time_unix_nano
    };

    if nanos == 0 {
        Utc::now()
    } else {
        DateTime::from_timestamp_nanos(nanos.min(i64::MAX as u64) as i64)
    }
}

fn severity_text(record: &OtlpLogRecord) -> String {
    if !record.severity_text.is_empty() {
        return record.severity_text.clone();
    }

    severity_from_number(record.severity_number).to_string()
}

/// Map an OTLP severity number to its text family.
fn severity_from_number(number: i32) -> &'static str {
    match number {
        1..=4 => "TRACE",
        5..=8 => "DEBUG",
        9..=12 => "INFO",
        13..=16 => "WARN",
        17..=20 => "ERROR",
        21..=24 => "FATAL",
        _ => "UNSPECIFIED",
    }
}

/// Lowercase hex rendering of raw bytes; empty input gives an empty string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::common::v1::{ArrayValue, KeyValueList};
    use opentelemetry_proto::tonic::logs::v1::{ResourceLogs, ScopeLogs};

    fn any_string(s: &str) -> AnyValue {
        AnyValue {
            value: Some(any_value::Value::StringValue(s.to_string())),
        }
    }

    fn key_value(key: &str, value: AnyValue) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(value),
        }
    }

    fn request_with(resource: Option<Resource>, records: Vec<OtlpLogRecord>) -> ExportLogsServiceRequest {
        ExportLogsServiceRequest {
            resource_logs: vec![ResourceLogs {
                resource,
                scope_logs: vec![ScopeLogs {
                    log_records: records,
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_transform_stamps_kafka_coordinates() {
        let request = request_with(
            Some(Resource {
                attributes: vec![key_value(ATTR_SERVICE_NAME, any_string("svc"))],
                ..Default::default()
            }),
            vec![OtlpLogRecord {
                severity_text: "INFO".to_string(),
                body: Some(any_string("hi")),
                ..Default::default()
            }],
        );

        let records = transform(&request, "t", 0, 10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kafka_topic, "t");
        assert_eq!(records[0].kafka_partition, 0);
        assert_eq!(records[0].kafka_offset, 10);
        assert_eq!(records[0].service_name, "svc");
        assert_eq!(records[0].severity, "INFO");
        assert_eq!(records[0].body, "hi");
    }

    #[test]
    fn test_transform_empty_request() {
        let request = ExportLogsServiceRequest {
            resource_logs: vec![],
        };
        assert!(transform(&request, "t", 0, 0).is_empty());
    }

    #[test]
    fn test_severity_number_families() {
        assert_eq!(severity_from_number(1), "TRACE");
        assert_eq!(severity_from_number(4), "TRACE");
        assert_eq!(severity_from_number(5), "DEBUG");
        assert_eq!(severity_from_number(9), "INFO");
        assert_eq!(severity_from_number(13), "WARN");
        assert_eq!(severity_from_number(17), "ERROR");
        assert_eq!(severity_from_number(21), "FATAL");
        assert_eq!(severity_from_number(24), "FATAL");
        assert_eq!(severity_from_number(0), "UNSPECIFIED");
        assert_eq!(severity_from_number(99), "UNSPECIFIED");
    }

    #[test]
    fn test_severity_text_preferred_over_number() {
        let record = OtlpLogRecord {
            severity_text: "NOTICE".to_string(),
            severity_number: 17,
            ..Default::default()
        };
        assert_eq!(severity_text(&record), "NOTICE");

        let record = OtlpLogRecord {
            severity_number: 17,
            ..Default::default()
        };
        assert_eq!(severity_text(&record), "ERROR");
    }

    #[test]
    fn test_render_scalar_values() {
        assert_eq!(render_any_value(&any_string("plain")), "plain");
        assert_eq!(
            render_any_value(&AnyValue {
                value: Some(any_value::Value::BoolValue(true))
            }),
            "true"
        );
        assert_eq!(
            render_any_value(&AnyValue {
                value: Some(any_value::Value::IntValue(-42))
            }),
            "-42"
        );
        assert_eq!(
            render_any_value(&AnyValue {
                value: Some(any_value::Value::DoubleValue(2.5))
            }),
            "2.5"
        );
        assert_eq!(
            render_any_value(&AnyValue {
                value: Some(any_value::Value::BytesValue(vec![0xde, 0xad, 0x01]))
            }),
            "dead01"
        );
        assert_eq!(render_any_value(&AnyValue { value: None }), "");
    }

    #[test]
    fn test_render_array_and_kvlist() {
        let array = AnyValue {
            value: Some(any_value::Value::ArrayValue(ArrayValue {
                values: vec![
                    any_string("a"),
                    AnyValue {
                        value: Some(any_value::Value::IntValue(1)),
                    },
                ],
            })),
        };
        assert_eq!(render_any_value(&array), "a,1");

        let kvlist = AnyValue {
            value: Some(any_value::Value::KvlistValue(KeyValueList {
                values: vec![
                    key_value("x", any_string("1")),
                    key_value("y", any_string("2")),
                ],
            })),
        };
        assert_eq!(render_any_value(&kvlist), "x=1,y=2");
    }

    #[test]
    fn test_trace_and_span_ids_hex() {
        let request = request_with(
            None,
            vec![OtlpLogRecord {
                trace_id: vec![0x0a, 0xff, 0x10, 0x00],
                span_id: vec![0x01, 0x02],
                ..Default::default()
            }],
        );

        let records = transform(&request, "t", 1, 5);
        assert_eq!(records[0].trace_id, "0aff1000");
        assert_eq!(records[0].span_id, "0102");
    }

    #[test]
    fn test_absent_ids_are_empty() {
        let request = request_with(None, vec![OtlpLogRecord::default()]);
        let records = transform(&request, "t", 1, 5);
        assert_eq!(records[0].trace_id, "");
        assert_eq!(records[0].span_id, "");
    }

    #[test]
    fn test_attribute_merge_precedence() {
        let request = request_with(
            Some(Resource {
                attributes: vec![
                    key_value(ATTR_SERVICE_NAME, any_string("svc")),
                    key_value("region", any_string("us-west-2")),
                    key_value("shared", any_string("from-resource")),
                ],
                ..Default::default()
            }),
            vec![OtlpLogRecord {
                attributes: vec![
                    key_value("shared", any_string("from-record")),
                    key_value("request_id", any_string("abc")),
                ],
                ..Default::default()
            }],
        );

        let records = transform(&request, "t", 0, 0);
        let attrs = &records[0].attributes;

        // Well-known keys are not duplicated into the map
        assert!(!attrs.contains_key(ATTR_SERVICE_NAME));
        assert_eq!(attrs.get("region").unwrap(), "us-west-2");
        assert_eq!(attrs.get("shared").unwrap(), "from-record");
        assert_eq!(attrs.get("request_id").unwrap(), "abc");
    }

    #[test]
    fn test_timestamp_fallback_order() {
        let record = OtlpLogRecord {
            time_unix_nano: 1_700_000_000_000_000_123,
            observed_time_unix_nano: 1_600_000_000_000_000_000,
            ..Default::default()
        };
        assert_eq!(
            record_timestamp(&record).timestamp_nanos_opt().unwrap(),
            1_700_000_000_000_000_123
        );

        let record = OtlpLogRecord {
            observed_time_unix_nano: 1_600_000_000_000_000_000,
            ..Default::default()
        };
        assert_eq!(
            record_timestamp(&record).timestamp_nanos_opt().unwrap(),
            1_600_000_000_000_000_000
        );

        let before = Utc::now();
        let now = record_timestamp(&OtlpLogRecord::default());
        assert!(now >= before);
    }

    #[test]
    fn test_estimated_size_counts_strings() {
        let mut attributes = BTreeMap::new();
        attributes.insert("k".to_string(), "v".to_string());

        let record = LogRecord {
            kafka_topic: "topic".to_string(),
            kafka_partition: 0,
            kafka_offset: 0,
            timestamp: Utc::now(),
            severity: "INFO".to_string(),
            body: "body".to_string(),
            trace_id: String::new(),
            span_id: String::new(),
            service_name: "svc".to_string(),
            deployment_environment: String::new(),
            host_name: String::new(),
            attributes,
        };

        // strings + map entries + fixed overhead
        assert!(record.estimated_size() > 100);
        assert!(record.estimated_size() < 200);
    }

    #[test]
    fn test_multiple_resource_groups() {
        let request = ExportLogsServiceRequest {
            resource_logs: vec![
                ResourceLogs {
                    resource: Some(Resource {
                        attributes: vec![key_value(ATTR_SERVICE_NAME, any_string("a"))],
                        ..Default::default()
                    }),
                    scope_logs: vec![ScopeLogs {
                        log_records: vec![OtlpLogRecord::default(), OtlpLogRecord::default()],
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                ResourceLogs {
                    resource: Some(Resource {
                        attributes: vec![key_value(ATTR_SERVICE_NAME, any_string("b"))],
                        ..Default::default()
                    }),
                    scope_logs: vec![ScopeLogs {
                        log_records: vec![OtlpLogRecord::default()],
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
        };

        let records = transform(&request, "t", 0, 1);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].service_name, "a");
        assert_eq!(records[2].service_name, "b");
        assert!(records.iter().all(|r| r.kafka_offset == 1));
    }
}
