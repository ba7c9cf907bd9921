//! Configuration structures for the appender.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Kafka consumer configuration
    pub kafka: KafkaConfig,

    /// Iceberg catalog and commit configuration
    pub iceberg: IcebergConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-partition buffering configuration
    #[serde(default)]
    pub partition: PartitionConfig,

    /// Rebalance behavior
    #[serde(default)]
    pub rebalance: RebalanceConfig,

    /// Dead letter queue configuration
    #[serde(default)]
    pub dlq: DlqConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Kafka consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap brokers
    pub brokers: Vec<String>,

    /// Topic to consume from
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u32,

    /// Max poll interval in milliseconds (must exceed the worst-case
    /// Iceberg commit latency, or the group coordinator evicts us mid-flush)
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,

    /// Auto offset reset strategy for partitions with no recoverable offset
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,
}

/// Kafka auto offset reset strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from earliest offset
    #[default]
    Earliest,
    /// Start from latest offset
    Latest,
}

/// Iceberg catalog and commit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IcebergConfig {
    /// REST catalog base URL
    pub catalog_uri: String,

    /// Target namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Target table name
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Maximum commit attempts per flush
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,

    /// Base retry delay in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Stop the partition worker when a commit fails fatally instead of
    /// halting the partition and retrying later
    #[serde(default)]
    pub exit_on_fatal_commit: bool,
}

/// Object storage connection.
///
/// Either the S3 settings (`endpoint`, `bucket`, `access_key`, `secret_key`)
/// or `local_path` must be provided; `local_path` backs dev and test runs
/// with a plain filesystem store.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// S3-compatible endpoint (MinIO, etc.)
    pub endpoint: Option<String>,

    /// Bucket name
    pub bucket: Option<String>,

    /// Access key
    pub access_key: Option<String>,

    /// Secret key
    pub secret_key: Option<String>,

    /// Region
    #[serde(default = "default_region")]
    pub region: String,

    /// Local filesystem warehouse path (development / testing)
    pub local_path: Option<PathBuf>,
}

/// Per-partition buffering configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitionConfig {
    /// Size flush trigger per worker, in megabytes
    #[serde(default = "default_buffer_size_mb")]
    pub buffer_size_mb: usize,

    /// Time flush trigger per worker, in seconds since last successful commit
    #[serde(default = "default_buffer_time_secs")]
    pub buffer_time_secs: u64,

    /// Record-count flush trigger per worker
    #[serde(default = "default_max_buffer_records")]
    pub max_buffer_records: usize,

    /// Bounded inbox depth per worker; a full inbox blocks the poll loop
    /// rather than dropping records
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            buffer_size_mb: default_buffer_size_mb(),
            buffer_time_secs: default_buffer_time_secs(),
            max_buffer_records: default_max_buffer_records(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Rebalance behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RebalanceConfig {
    /// How long to wait for a worker to stop during revocation, in seconds.
    /// Must exceed the expected tail commit latency: an in-flight Iceberg
    /// commit runs to completion and cannot be cancelled.
    #[serde(default = "default_rebalance_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_rebalance_timeout_secs(),
        }
    }
}

/// Dead letter queue configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DlqConfig {
    /// Append-only file for unparseable payloads; absent disables the DLQ
    pub path: Option<PathBuf>,
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Admin HTTP port (health, readiness, stats, force flush)
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            admin_port: default_admin_port(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_topic() -> String {
    "otel-logs".to_string()
}
fn default_consumer_group() -> String {
    "otel-appender".to_string()
}
fn default_session_timeout_ms() -> u32 {
    30000
}
fn default_heartbeat_interval_ms() -> u32 {
    3000
}
fn default_max_poll_interval_ms() -> u32 {
    300000
}
fn default_namespace() -> String {
    "default".to_string()
}
fn default_table_name() -> String {
    "logs".to_string()
}
fn default_commit_retries() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    100
}
fn default_retry_max_ms() -> u64 {
    5000
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_buffer_size_mb() -> usize {
    50
}
fn default_buffer_time_secs() -> u64 {
    60
}
fn default_max_buffer_records() -> usize {
    100_000
}
fn default_queue_depth() -> usize {
    64
}
fn default_rebalance_timeout_secs() -> u64 {
    30
}
fn default_admin_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.brokers.is_empty() {
            return Err(crate::Error::Config(
                "At least one Kafka broker is required".into(),
            ));
        }

        if self.kafka.topic.is_empty() {
            return Err(crate::Error::Config("Kafka topic is required".into()));
        }

        if self.kafka.consumer_group.is_empty() {
            return Err(crate::Error::Config("Consumer group is required".into()));
        }

        if self.iceberg.catalog_uri.is_empty() {
            return Err(crate::Error::Config(
                "Iceberg catalog URI is required".into(),
            ));
        }

        if self.iceberg.commit_retries == 0 {
            return Err(crate::Error::Config(
                "iceberg.commit_retries must be at least 1".into(),
            ));
        }

        if self.storage.local_path.is_none() {
            for (key, value) in [
                ("storage.endpoint", &self.storage.endpoint),
                ("storage.bucket", &self.storage.bucket),
                ("storage.access_key", &self.storage.access_key),
                ("storage.secret_key", &self.storage.secret_key),
            ] {
                if value.as_deref().map_or(true, str::is_empty) {
                    return Err(crate::Error::Config(format!("{} is required", key)));
                }
            }
        }

        if self.partition.queue_depth == 0 {
            return Err(crate::Error::Config(
                "partition.queue_depth must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            kafka: KafkaConfig {
                brokers: vec!["localhost:9092".into()],
                topic: default_topic(),
                consumer_group: default_consumer_group(),
                session_timeout_ms: default_session_timeout_ms(),
                heartbeat_interval_ms: default_heartbeat_interval_ms(),
                max_poll_interval_ms: default_max_poll_interval_ms(),
                auto_offset_reset: OffsetReset::Earliest,
            },
            iceberg: IcebergConfig {
                catalog_uri: "http://localhost:8181".into(),
                namespace: default_namespace(),
                table_name: default_table_name(),
                commit_retries: default_commit_retries(),
                retry_base_ms: default_retry_base_ms(),
                retry_max_ms: default_retry_max_ms(),
                exit_on_fatal_commit: false,
            },
            storage: StorageConfig {
                endpoint: Some("http://localhost:9000".into()),
                bucket: Some("warehouse".into()),
                access_key: Some("minio".into()),
                secret_key: Some("minio123".into()),
                region: default_region(),
                local_path: None,
            },
            partition: PartitionConfig::default(),
            rebalance: RebalanceConfig::default(),
            dlq: DlqConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    #[test]
    fn test_defaults() {
        let partition = PartitionConfig::default();
        assert_eq!(partition.buffer_size_mb, 50);
        assert_eq!(partition.buffer_time_secs, 60);
        assert_eq!(partition.queue_depth, 64);

        assert_eq!(RebalanceConfig::default().timeout_secs, 30);
        assert_eq!(MonitoringConfig::default().admin_port, 8080);
        assert_eq!(MonitoringConfig::default().log_format, LogFormat::Json);
        assert_eq!(OffsetReset::default(), OffsetReset::Earliest);
        assert!(DlqConfig::default().path.is_none());
    }

    #[test]
    fn test_validation_ok() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validation_empty_brokers() {
        let mut config = base_config();
        config.kafka.brokers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_empty_catalog_uri() {
        let mut config = base_config();
        config.iceberg.catalog_uri.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("catalog URI"));
    }

    #[test]
    fn test_validation_missing_storage() {
        let mut config = base_config();
        config.storage.secret_key = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.secret_key"));
    }

    #[test]
    fn test_validation_local_path_alternative() {
        let mut config = base_config();
        config.storage = StorageConfig {
            local_path: Some(PathBuf::from("/tmp/warehouse")),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_retries() {
        let mut config = base_config();
        config.iceberg.commit_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            [kafka]
            brokers = ["broker-1:9092", "broker-2:9092"]

            [iceberg]
            catalog_uri = "http://catalog:8181"

            [storage]
            endpoint = "http://minio:9000"
            bucket = "warehouse"
            access_key = "ak"
            secret_key = "sk"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.kafka.topic, "otel-logs");
        assert_eq!(config.kafka.consumer_group, "otel-appender");
        assert_eq!(config.iceberg.namespace, "default");
        assert_eq!(config.iceberg.table_name, "logs");
        assert_eq!(config.iceberg.commit_retries, 5);
        assert_eq!(config.iceberg.retry_base_ms, 100);
        assert_eq!(config.iceberg.retry_max_ms, 5000);
        assert!(!config.iceberg.exit_on_fatal_commit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_dlq_path() {
        let toml = r#"
            [kafka]
            brokers = ["b:9092"]

            [iceberg]
            catalog_uri = "http://catalog:8181"

            [storage]
            local_path = "/tmp/warehouse"

            [dlq]
            path = "/var/lib/icelog/dlq.bin"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.dlq.path,
            Some(PathBuf::from("/var/lib/icelog/dlq.bin"))
        );
    }
}
