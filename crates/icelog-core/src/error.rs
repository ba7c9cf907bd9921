//! Error types for the icelog core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for icelog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for icelog.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka-related error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Iceberg-related error
    #[error("Iceberg error: {0}")]
    Iceberg(#[from] IcebergError),

    /// Staging buffer error
    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    /// Message transformation error
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Offset commit failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Seek failed
    #[error("Seek failed for partition {partition}: {message}")]
    Seek { partition: i32, message: String },

    /// Partition assignment error
    #[error("Partition assignment error: {0}")]
    PartitionAssignment(String),

    /// Consumer closed
    #[error("Consumer closed")]
    ConsumerClosed,
}

/// Iceberg-specific errors.
///
/// Commit errors split into retryable (conflicts, transient I/O) and fatal
/// (schema, credentials) classes; workers consult [`IcebergError::is_retryable`]
/// to decide between backoff and halting.
#[derive(Error, Debug)]
pub enum IcebergError {
    /// Catalog connection failed during initialization
    #[error("Catalog connection failed: {0}")]
    CatalogConnection(String),

    /// Catalog temporarily unreachable (network blip, 5xx)
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// Optimistic-concurrency conflict on commit
    #[error("Commit conflict: expected snapshot {expected:?}")]
    CommitConflict { expected: Option<i64> },

    /// Table not found
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Authentication or authorization failure
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Schema mismatch between expected and actual
    #[error("Schema mismatch: expected {expected}, actual {actual}")]
    SchemaMismatch { expected: String, actual: String },

    /// Parquet serialization error
    #[error("Parquet write error: {0}")]
    ParquetWrite(String),

    /// Object store upload error
    #[error("File upload error: {0}")]
    FileUpload(String),

    /// Generic Iceberg error
    #[error("Iceberg error: {0}")]
    Other(String),
}

impl IcebergError {
    /// Whether a commit that failed with this error is safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IcebergError::CommitConflict { .. }
                | IcebergError::CatalogUnavailable(_)
                | IcebergError::FileUpload(_)
        )
    }
}

/// Staging buffer errors.
#[derive(Error, Debug)]
pub enum StagingError {
    /// Arrow conversion error
    #[error("Arrow conversion error: {0}")]
    ArrowConversion(String),

    /// The worker owning the staging buffer is no longer accepting records
    #[error("Worker for partition {partition} is not accepting records")]
    WorkerUnavailable { partition: i32 },
}

/// Errors raised while decoding an inbound message.
///
/// All of these identify the producer as the faulty party; the message is
/// routed to the dead letter queue and its offset is advanced.
#[derive(Error, Debug)]
pub enum TransformError {
    /// Envelope bytes did not decode
    #[error("Envelope decode failed: {0}")]
    EnvelopeDecode(String),

    /// Content type outside the accepted set
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Telemetry type other than OTLP logs
    #[error("Unsupported telemetry type: {0}")]
    UnsupportedTelemetryType(i32),

    /// Payload did not parse as an OTLP logs request
    #[error("Payload decode failed: {0}")]
    PayloadDecode(String),
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
