//! Iceberg REST Catalog API types.
//!
//! Models the subset of the Apache Iceberg REST Catalog API this appender
//! speaks: namespace/table creation, table load, and snapshot commits.
//! See: https://iceberg.apache.org/spec/#iceberg-rest-catalog-api

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Create namespace request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNamespaceRequest {
    /// Namespace identifier (multi-part)
    pub namespace: Vec<String>,
    /// Namespace properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Create table request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTableRequest {
    /// Table name
    pub name: String,
    /// Table location (catalog assigns when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Table schema
    pub schema: Schema,
    /// Table properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Load table response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTableResponse {
    /// Metadata location
    #[serde(rename = "metadata-location")]
    pub metadata_location: Option<String>,
    /// Table metadata
    pub metadata: TableMetadata,
}

/// Table metadata.
///
/// Only the parts this appender reads; unknown fields are ignored on
/// deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Format version (1 or 2)
    #[serde(default, rename = "format-version")]
    pub format_version: i32,
    /// Table UUID
    #[serde(default, rename = "table-uuid")]
    pub table_uuid: String,
    /// Table location
    #[serde(default)]
    pub location: String,
    /// Last updated timestamp (ms)
    #[serde(default, rename = "last-updated-ms")]
    pub last_updated_ms: i64,
    /// Current schema (v1 layout)
    #[serde(default)]
    pub schema: Option<Schema>,
    /// All schemas (v2 layout)
    #[serde(default)]
    pub schemas: Vec<Schema>,
    /// Current schema ID
    #[serde(default, rename = "current-schema-id")]
    pub current_schema_id: i32,
    /// Table properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Current snapshot ID
    #[serde(default, rename = "current-snapshot-id")]
    pub current_snapshot_id: Option<i64>,
    /// Snapshots
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    /// Snapshot log
    #[serde(default, rename = "snapshot-log")]
    pub snapshot_log: Vec<SnapshotLogEntry>,
}

/// Iceberg schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Schema ID
    #[serde(rename = "schema-id")]
    pub schema_id: i32,
    /// Schema type (always "struct")
    #[serde(rename = "type", default = "default_struct_type")]
    pub r#type: String,
    /// Schema fields
    pub fields: Vec<SchemaField>,
    /// Identifier field IDs
    #[serde(default, rename = "identifier-field-ids")]
    pub identifier_field_ids: Vec<i32>,
}

fn default_struct_type() -> String {
    "struct".to_string()
}

/// Schema field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    /// Field ID
    pub id: i32,
    /// Field name
    pub name: String,
    /// Field type (primitive name or nested type object)
    #[serde(rename = "type")]
    pub field_type: serde_json::Value,
    /// Whether field is required
    pub required: bool,
    /// Documentation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

/// Snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot ID
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,
    /// Parent snapshot ID
    #[serde(skip_serializing_if = "Option::is_none", rename = "parent-snapshot-id")]
    pub parent_snapshot_id: Option<i64>,
    /// Sequence number
    #[serde(default, rename = "sequence-number")]
    pub sequence_number: i64,
    /// Timestamp (ms)
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,
    /// Manifest list location
    #[serde(default, rename = "manifest-list")]
    pub manifest_list: String,
    /// Snapshot summary
    #[serde(default)]
    pub summary: HashMap<String, String>,
    /// Schema ID
    #[serde(skip_serializing_if = "Option::is_none", rename = "schema-id")]
    pub schema_id: Option<i32>,
}

/// Snapshot log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLogEntry {
    /// Snapshot ID
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,
    /// Timestamp (ms)
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,
}

/// Commit table request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitTableRequest {
    /// Requirements for optimistic concurrency
    pub requirements: Vec<TableRequirement>,
    /// Updates to apply
    pub updates: Vec<TableUpdate>,
}

/// Table requirement for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TableRequirement {
    /// Assert the `main` branch points at the expected snapshot
    #[serde(rename = "assert-ref-snapshot-id")]
    AssertRefSnapshotId {
        #[serde(rename = "ref")]
        ref_name: String,
        #[serde(rename = "snapshot-id")]
        snapshot_id: Option<i64>,
    },
}

/// Table update operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum TableUpdate {
    /// Add snapshot
    #[serde(rename = "add-snapshot")]
    AddSnapshot { snapshot: Snapshot },
    /// Set snapshot ref (branch or tag)
    #[serde(rename = "set-snapshot-ref")]
    SetSnapshotRef {
        #[serde(rename = "ref-name")]
        ref_name: String,
        #[serde(rename = "snapshot-id")]
        snapshot_id: i64,
        #[serde(rename = "type")]
        ref_type: String,
    },
}

/// Commit table response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitTableResponse {
    /// Metadata location
    #[serde(rename = "metadata-location")]
    pub metadata_location: String,
    /// Updated metadata
    pub metadata: TableMetadata,
}

/// Error response from the REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// HTTP status code
    #[serde(default)]
    pub code: i32,
    /// Error message
    #[serde(default)]
    pub message: String,
}
