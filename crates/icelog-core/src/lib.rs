//! Icelog core - OTLP log ingestion from Kafka into Apache Iceberg.
//!
//! This library implements the appender side of the pipeline: it consumes
//! framed OTLP log payloads from a Kafka topic, transforms them into a flat
//! log schema, buffers them per partition, and commits them to an Apache
//! Iceberg table with exactly-once semantics anchored on the
//! `(_kafka_topic, _kafka_partition, _kafka_offset)` columns:
//!
//! - One worker per assigned partition with size/time flush triggers
//! - Iceberg commits retried with exponential backoff on conflicts
//! - Startup and rebalance recovery via the table's committed offsets
//! - Kafka offsets committed only after Iceberg durability

pub mod config;
pub mod coordinator;
pub mod dlq;
pub mod envelope;
pub mod error;
pub mod health;
pub mod iceberg;
pub mod kafka;
pub mod metrics;
pub mod schema;
pub mod staging;
pub mod transform;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use error::{IcebergError, KafkaError, StagingError, TransformError};
pub use error::{Error, Result};
