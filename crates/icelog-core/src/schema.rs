//! The persisted log table schema, in its Arrow and Iceberg forms.
//!
//! The three leading `_kafka_*` columns are the exactly-once anchor: every
//! row records where it came from, and recovery queries lean on them. Field
//! ids are fixed; the table is never evolved in place.

use crate::iceberg::rest;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use std::sync::{Arc, OnceLock};

/// Entry/key/value names used for the `attributes` map column.
///
/// These match the Parquet MAP layout so readers see the canonical
/// `key_value(key, value)` group names.
pub const MAP_ENTRY: &str = "key_value";
pub const MAP_KEY: &str = "key";
pub const MAP_VALUE: &str = "value";

/// Arrow schema of the log table.
pub fn log_arrow_schema() -> SchemaRef {
    static SCHEMA: OnceLock<SchemaRef> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            Arc::new(Schema::new(vec![
                Field::new("_kafka_topic", DataType::Utf8, false),
                Field::new("_kafka_partition", DataType::Int32, false),
                Field::new("_kafka_offset", DataType::Int64, false),
                Field::new(
                    "timestamp",
                    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                    false,
                ),
                Field::new("severity", DataType::Utf8, false),
                Field::new("body", DataType::Utf8, false),
                Field::new("trace_id", DataType::Utf8, false),
                Field::new("span_id", DataType::Utf8, false),
                Field::new("service_name", DataType::Utf8, false),
                Field::new("deployment_environment", DataType::Utf8, false),
                Field::new("host_name", DataType::Utf8, false),
                Field::new_map(
                    "attributes",
                    MAP_ENTRY,
                    Field::new(MAP_KEY, DataType::Utf8, false),
                    Field::new(MAP_VALUE, DataType::Utf8, false),
                    false,
                    false,
                ),
            ]))
        })
        .clone()
}

/// Iceberg schema of the log table, as sent to the catalog on creation.
pub fn log_iceberg_schema() -> rest::Schema {
    let string_field = |id: i32, name: &str| rest::SchemaField {
        id,
        name: name.to_string(),
        field_type: serde_json::Value::String("string".to_string()),
        required: false,
        doc: None,
    };

    let mut fields = vec![
        rest::SchemaField {
            id: 1,
            name: "_kafka_topic".to_string(),
            field_type: serde_json::Value::String("string".to_string()),
            required: true,
            doc: Some("Source Kafka topic".to_string()),
        },
        rest::SchemaField {
            id: 2,
            name: "_kafka_partition".to_string(),
            field_type: serde_json::Value::String("int".to_string()),
            required: true,
            doc: Some("Source Kafka partition".to_string()),
        },
        rest::SchemaField {
            id: 3,
            name: "_kafka_offset".to_string(),
            field_type: serde_json::Value::String("long".to_string()),
            required: true,
            doc: Some("Source Kafka offset; unique per (topic, partition)".to_string()),
        },
        rest::SchemaField {
            id: 4,
            name: "timestamp".to_string(),
            field_type: serde_json::Value::String("timestamptz".to_string()),
            required: false,
            doc: None,
        },
    ];

    fields.push(string_field(5, "severity"));
    fields.push(string_field(6, "body"));
    fields.push(string_field(7, "trace_id"));
    fields.push(string_field(8, "span_id"));
    fields.push(string_field(9, "service_name"));
    fields.push(string_field(10, "deployment_environment"));
    fields.push(string_field(11, "host_name"));
    fields.push(rest::SchemaField {
        id: 12,
        name: "attributes".to_string(),
        field_type: serde_json::json!({
            "type": "map",
            "key-id": 13,
            "key": "string",
            "value-id": 14,
            "value": "string",
            "value-required": true
        }),
        required: false,
        doc: None,
    });

    rest::Schema {
        schema_id: 0,
        r#type: "struct".to_string(),
        fields,
        identifier_field_ids: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrow_schema_columns() {
        let schema = log_arrow_schema();
        assert_eq!(schema.fields().len(), 12);
        assert_eq!(schema.field(0).name(), "_kafka_topic");
        assert_eq!(schema.field(1).name(), "_kafka_partition");
        assert_eq!(schema.field(2).name(), "_kafka_offset");
        assert!(!schema.field(0).is_nullable());
        assert!(!schema.field(1).is_nullable());
        assert!(!schema.field(2).is_nullable());

        assert_eq!(
            schema.field(3).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        );
        assert!(matches!(
            schema.field(11).data_type(),
            DataType::Map(_, false)
        ));
    }

    #[test]
    fn test_iceberg_schema_field_ids() {
        let schema = log_iceberg_schema();
        assert_eq!(schema.fields.len(), 12);

        // Kafka anchor columns are required
        for field in &schema.fields[0..3] {
            assert!(field.required, "{} must be required", field.name);
        }

        let ids: Vec<i32> = schema.fields.iter().map(|f| f.id).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<_>>());

        let attrs = &schema.fields[11];
        assert_eq!(attrs.name, "attributes");
        assert_eq!(attrs.field_type["type"], "map");
        assert_eq!(attrs.field_type["key-id"], 13);
        assert_eq!(attrs.field_type["value-id"], 14);
    }

    #[test]
    fn test_schema_is_cached() {
        assert!(Arc::ptr_eq(&log_arrow_schema(), &log_arrow_schema()));
    }
}
