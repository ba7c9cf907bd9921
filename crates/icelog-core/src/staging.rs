//! Per-partition staging buffer.
//!
//! Each partition worker owns exactly one `StagingStore`. Rows accumulate
//! between Iceberg commits and are only truncated after the commit is
//! acknowledged, so a failed or conflicted commit leaves the batch intact
//! for the retry loop.

use crate::error::StagingError;
use crate::schema::{log_arrow_schema, MAP_ENTRY, MAP_KEY, MAP_VALUE};
use crate::transform::LogRecord;
use arrow::array::{
    ArrayRef, Int32Builder, Int64Builder, MapBuilder, MapFieldNames, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Buffered rows for one partition, staged between Iceberg commits.
pub struct StagingStore {
    partition: i32,
    records: Vec<LogRecord>,
    estimated_bytes: usize,
}

impl StagingStore {
    /// Create an empty staging store for a partition.
    pub fn new(partition: i32) -> Self {
        Self {
            partition,
            records: Vec::new(),
            estimated_bytes: 0,
        }
    }

    /// The partition this store belongs to.
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Append a batch of records.
    pub fn insert(&mut self, records: Vec<LogRecord>) {
        self.estimated_bytes += estimate_records_size(&records);
        self.records.extend(records);
    }

    /// Number of buffered rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Estimated buffered bytes; feeds the size flush trigger.
    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    /// Smallest and largest buffered offset, if any rows are buffered.
    pub fn offset_range(&self) -> Option<(i64, i64)> {
        let min = self.records.iter().map(|r| r.kafka_offset).min()?;
        let max = self.records.iter().map(|r| r.kafka_offset).max()?;
        Some((min, max))
    }

    /// Build an Arrow batch of the buffered rows without consuming them.
    ///
    /// The rows stay buffered until [`StagingStore::truncate`]; commit
    /// failures therefore retry the identical batch.
    pub fn to_record_batch(&self) -> Result<RecordBatch, StagingError> {
        let mut topic = StringBuilder::new();
        let mut partition = Int32Builder::new();
        let mut offset = Int64Builder::new();
        let mut timestamp = TimestampMicrosecondBuilder::new().with_timezone("UTC");
        let mut severity = StringBuilder::new();
        let mut body = StringBuilder::new();
        let mut trace_id = StringBuilder::new();
        let mut span_id = StringBuilder::new();
        let mut service_name = StringBuilder::new();
        let mut deployment_environment = StringBuilder::new();
        let mut host_name = StringBuilder::new();
        let mut attributes = MapBuilder::new(
            Some(MapFieldNames {
                entry: MAP_ENTRY.to_string(),
                key: MAP_KEY.to_string(),
                value: MAP_VALUE.to_string(),
            }),
            StringBuilder::new(),
            StringBuilder::new(),
        )
        .with_values_field(Field::new(MAP_VALUE, DataType::Utf8, false));

        for record in &self.records {
            topic.append_value(&record.kafka_topic);
            partition.append_value(record.kafka_partition);
            offset.append_value(record.kafka_offset);
            timestamp.append_value(record.timestamp.timestamp_micros());
            severity.append_value(&record.severity);
            body.append_value(&record.body);
            trace_id.append_value(&record.trace_id);
            span_id.append_value(&record.span_id);
            service_name.append_value(&record.service_name);
            deployment_environment.append_value(&record.deployment_environment);
            host_name.append_value(&record.host_name);

            for (key, value) in &record.attributes {
                attributes.keys().append_value(key);
                attributes.values().append_value(value);
            }
            attributes
                .append(true)
                .map_err(|e| StagingError::ArrowConversion(e.to_string()))?;
        }

        let columns: Vec<ArrayRef> = vec![
            Arc::new(topic.finish()),
            Arc::new(partition.finish()),
            Arc::new(offset.finish()),
            Arc::new(timestamp.finish()),
            Arc::new(severity.finish()),
            Arc::new(body.finish()),
            Arc::new(trace_id.finish()),
            Arc::new(span_id.finish()),
            Arc::new(service_name.finish()),
            Arc::new(deployment_environment.finish()),
            Arc::new(host_name.finish()),
            Arc::new(attributes.finish()),
        ];

        RecordBatch::try_new(log_arrow_schema(), columns)
            .map_err(|e| StagingError::ArrowConversion(e.to_string()))
    }

    /// Clear the buffer after a successful Iceberg commit.
    pub fn truncate(&mut self) {
        self.records.clear();
        self.estimated_bytes = 0;
    }
}

/// Cheap upper bound on the in-memory size of a record batch.
pub fn estimate_records_size(records: &[LogRecord]) -> usize {
    records.iter().map(LogRecord::estimated_size).sum()
}
