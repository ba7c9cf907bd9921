//! Shared Iceberg table client.
//!
//! One client serves every partition worker. A commit turns a staged Arrow
//! batch into a Parquet file on object storage plus an atomic catalog
//! snapshot whose summary records the Kafka coordinates it covers; recovery
//! reads those summaries back to find the highest committed offset per
//! partition.
//!
//! ## Write flow
//!
//! 1. Convert the RecordBatch to Parquet bytes (Snappy)
//! 2. Upload to object storage
//! 3. Commit an append snapshot with a CAS requirement on the current
//!    snapshot; conflicts surface as retryable errors
//!
//! Commits are serialized internally, so concurrent workers either succeed
//! or observe a conflict caused by another process, never by a sibling.

use crate::config::{IcebergConfig, StorageConfig};
use crate::error::{Error, IcebergError, Result};
use crate::iceberg::catalog::{AppendCommit, Catalog, RestCatalog};
use crate::schema::log_iceberg_schema;
use arrow::array::{Array, Int32Array, Int64Array, StringArray, TimestampMicrosecondArray};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Snapshot summary keys recording the Kafka coordinates of a commit.
const SUMMARY_TOPIC: &str = "kafka-topic";
const SUMMARY_PARTITION: &str = "kafka-partition";
const SUMMARY_OFFSET_MIN: &str = "kafka-offset-min";
const SUMMARY_OFFSET_MAX: &str = "kafka-offset-max";

/// Shared handle to the target Iceberg table.
pub struct IcebergClient {
    catalog: Arc<dyn Catalog>,
    object_store: Arc<dyn ObjectStore>,
    namespace: String,
    table_name: String,
    // Serializes commits so sibling workers never conflict with each other
    commit_lock: tokio::sync::Mutex<()>,
}

/// Builder for [`IcebergClient`].
pub struct IcebergClientBuilder {
    iceberg: IcebergConfig,
    storage: StorageConfig,
    catalog: Option<Arc<dyn Catalog>>,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl IcebergClientBuilder {
    /// Create a builder from configuration.
    pub fn new(iceberg: IcebergConfig, storage: StorageConfig) -> Self {
        Self {
            iceberg,
            storage,
            catalog: None,
            object_store: None,
        }
    }

    /// Use a pre-built catalog instead of a REST client.
    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use a pre-built object store.
    pub fn with_object_store(mut self, object_store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(object_store);
        self
    }

    /// Connect, ensure the namespace, and create the table if missing.
    pub async fn build(self) -> Result<IcebergClient> {
        let object_store = match self.object_store {
            Some(store) => store,
            None => create_object_store(&self.storage)?,
        };

        let catalog: Arc<dyn Catalog> = match self.catalog {
            Some(catalog) => catalog,
            None => Arc::new(RestCatalog::new(&self.iceberg.catalog_uri)?),
        };

        let client = IcebergClient {
            catalog,
            object_store,
            namespace: self.iceberg.namespace,
            table_name: self.iceberg.table_name,
            commit_lock: tokio::sync::Mutex::new(()),
        };

        client.catalog.ensure_namespace(&client.namespace).await?;

        if !client
            .catalog
            .table_exists(&client.namespace, &client.table_name)
            .await?
        {
            client
                .catalog
                .create_table(&client.namespace, &client.table_name, log_iceberg_schema())
                .await?;
        }

        info!(
            table = %client.full_table_name(),
            "Iceberg table ready"
        );

        Ok(client)
    }
}

impl IcebergClient {
    /// Create a builder.
    pub fn builder(iceberg: IcebergConfig, storage: StorageConfig) -> IcebergClientBuilder {
        IcebergClientBuilder::new(iceberg, storage)
    }

    /// Fully qualified table name.
    pub fn full_table_name(&self) -> String {
        format!("{}.{}", self.namespace, self.table_name)
    }

    /// Commit a staged batch to the table. Returns the new snapshot ID.
    ///
    /// The batch must be non-empty and single-partition (one worker's
    /// staging contents).
    pub async fn commit(&self, batch: &RecordBatch) -> Result<i64> {
        let total_start = Instant::now();
        let row_count = batch.num_rows();

        if row_count == 0 {
            return Err(Error::Iceberg(IcebergError::ParquetWrite(
                "Cannot commit an empty batch".into(),
            )));
        }

        let coords = BatchCoordinates::from_batch(batch)?;
        let file_path = self.data_file_path(&coords);

        let parquet_bytes = convert_to_parquet(batch)?;
        let file_size_bytes = parquet_bytes.len();

        self.upload_file(&file_path, parquet_bytes).await?;

        debug!(
            path = %file_path,
            size_bytes = file_size_bytes,
            rows = row_count,
            "Uploaded Parquet data file"
        );

        let _guard = self.commit_lock.lock().await;

        let metadata = self
            .catalog
            .load_metadata(&self.namespace, &self.table_name)
            .await?;

        let mut summary = HashMap::new();
        summary.insert("operation".to_string(), "append".to_string());
        summary.insert("added-data-files".to_string(), "1".to_string());
        summary.insert("added-records".to_string(), row_count.to_string());
        summary.insert("added-files-size".to_string(), file_size_bytes.to_string());
        summary.insert("data-file".to_string(), file_path.clone());
        summary.insert(SUMMARY_TOPIC.to_string(), coords.topic.clone());
        summary.insert(SUMMARY_PARTITION.to_string(), coords.partition.to_string());
        summary.insert(SUMMARY_OFFSET_MIN.to_string(), coords.min_offset.to_string());
        summary.insert(SUMMARY_OFFSET_MAX.to_string(), coords.max_offset.to_string());

        let snapshot_id = self
            .catalog
            .commit_append(
                &self.namespace,
                &self.table_name,
                AppendCommit {
                    expected_snapshot_id: metadata.current_snapshot_id,
                    sequence_number: metadata.snapshots.len() as i64 + 1,
                    summary,
                },
            )
            .await?;

        info!(
            table = %self.full_table_name(),
            partition = coords.partition,
            offsets = %format!("{}..{}", coords.min_offset, coords.max_offset),
            rows = row_count,
            snapshot_id,
            duration_ms = total_start.elapsed().as_millis() as u64,
            "Batch committed to Iceberg"
        );

        Ok(snapshot_id)
    }

    /// Highest committed offset for a (topic, partition), or `None` when the
    /// table holds no data for it.
    ///
    /// Scans the snapshot summaries recorded by [`IcebergClient::commit`];
    /// callable on a fresh table.
    pub async fn max_offset(&self, topic: &str, partition: i32) -> Result<Option<i64>> {
        let metadata = match self
            .catalog
            .load_metadata(&self.namespace, &self.table_name)
            .await
        {
            Ok(metadata) => metadata,
            Err(Error::Iceberg(IcebergError::TableNotFound(_))) => return Ok(None),
            Err(e) => return Err(e),
        };

        let partition_value = partition.to_string();
        let max = metadata
            .snapshots
            .iter()
            .filter(|snapshot| {
                snapshot.summary.get(SUMMARY_TOPIC).map(String::as_str) == Some(topic)
                    && snapshot.summary.get(SUMMARY_PARTITION) == Some(&partition_value)
            })
            .filter_map(|snapshot| {
                snapshot
                    .summary
                    .get(SUMMARY_OFFSET_MAX)
                    .and_then(|v| v.parse::<i64>().ok())
            })
            .max();

        Ok(max)
    }

    /// Data file path: partitioned by event date and Kafka partition, with
    /// the offset range in the file name for traceability.
    fn data_file_path(&self, coords: &BatchCoordinates) -> String {
        format!(
            "data/{}/{}/date={}/kafka_partition={}/part-{}-{}-{}.parquet",
            self.namespace,
            self.table_name,
            coords.event_time.format("%Y-%m-%d"),
            coords.partition,
            Uuid::new_v4(),
            coords.min_offset,
            coords.max_offset
        )
    }

    async fn upload_file(&self, path: &str, data: Bytes) -> Result<()> {
        let object_path = ObjectPath::from(path);
        let payload = PutPayload::from_bytes(data);

        self.object_store
            .put(&object_path, payload)
            .await
            .map_err(|e| {
                Error::Iceberg(IcebergError::FileUpload(format!(
                    "Failed to upload {}: {}",
                    path, e
                )))
            })?;

        Ok(())
    }
}

/// Kafka coordinates and event time extracted from a staged batch.
struct BatchCoordinates {
    topic: String,
    partition: i32,
    min_offset: i64,
    max_offset: i64,
    event_time: DateTime<Utc>,
}

impl BatchCoordinates {
    fn from_batch(batch: &RecordBatch) -> Result<Self> {
        let topic = batch
            .column_by_name("_kafka_topic")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .filter(|arr| !arr.is_empty())
            .map(|arr| arr.value(0).to_string())
            .ok_or_else(|| {
                Error::Iceberg(IcebergError::ParquetWrite(
                    "Batch is missing the _kafka_topic column".into(),
                ))
            })?;

        let partition = batch
            .column_by_name("_kafka_partition")
            .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
            .filter(|arr| !arr.is_empty())
            .map(|arr| arr.value(0))
            .ok_or_else(|| {
                Error::Iceberg(IcebergError::ParquetWrite(
                    "Batch is missing the _kafka_partition column".into(),
                ))
            })?;

        let (min_offset, max_offset) = batch
            .column_by_name("_kafka_offset")
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
            .filter(|arr| !arr.is_empty())
            .map(|arr| {
                let mut min = i64::MAX;
                let mut max = i64::MIN;
                for i in 0..arr.len() {
                    let v = arr.value(i);
                    min = min.min(v);
                    max = max.max(v);
                }
                (min, max)
            })
            .ok_or_else(|| {
                Error::Iceberg(IcebergError::ParquetWrite(
                    "Batch is missing the _kafka_offset column".into(),
                ))
            })?;

        let event_time = batch
            .column_by_name("timestamp")
            .and_then(|c| c.as_any().downcast_ref::<TimestampMicrosecondArray>())
            .filter(|arr| !arr.is_empty())
            .and_then(|arr| DateTime::from_timestamp_micros(arr.value(0)))
            .unwrap_or_else(Utc::now);

        Ok(Self {
            topic,
            partition,
            min_offset,
            max_offset,
            event_time,
        })
    }
}

/// Serialize an Arrow batch to Parquet bytes with Snappy compression.
fn convert_to_parquet(batch: &RecordBatch) -> Result<Bytes> {
    let mut buffer = Cursor::new(Vec::new());

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut writer =
        ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props)).map_err(|e| {
            Error::Iceberg(IcebergError::ParquetWrite(format!(
                "Failed to create Parquet writer: {}",
                e
            )))
        })?;

    writer.write(batch).map_err(|e| {
        Error::Iceberg(IcebergError::ParquetWrite(format!(
            "Failed to write batch: {}",
            e
        )))
    })?;

    writer.close().map_err(|e| {
        Error::Iceberg(IcebergError::ParquetWrite(format!(
            "Failed to close Parquet writer: {}",
            e
        )))
    })?;

    Ok(Bytes::from(buffer.into_inner()))
}

/// Create an object store from configuration: S3-compatible when endpoint
/// settings are present, local filesystem otherwise.
fn create_object_store(storage: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    if let Some(ref local_path) = storage.local_path {
        if !local_path.exists() {
            std::fs::create_dir_all(local_path).map_err(|e| {
                Error::Iceberg(IcebergError::FileUpload(format!(
                    "Failed to create local warehouse directory: {}",
                    e
                )))
            })?;
        }

        let store = object_store::local::LocalFileSystem::new_with_prefix(local_path)
            .map_err(|e| Error::Iceberg(IcebergError::FileUpload(e.to_string())))?;
        return Ok(Arc::new(store));
    }

    use object_store::aws::AmazonS3Builder;

    let bucket = storage
        .bucket
        .as_deref()
        .ok_or_else(|| Error::Config("storage.bucket is required".into()))?;
    let endpoint = storage
        .endpoint
        .as_deref()
        .ok_or_else(|| Error::Config("storage.endpoint is required".into()))?;
    let access_key = storage
        .access_key
        .as_deref()
        .ok_or_else(|| Error::Config("storage.access_key is required".into()))?;
    let secret_key = storage
        .secret_key
        .as_deref()
        .ok_or_else(|| Error::Config("storage.secret_key is required".into()))?;

    let store = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_endpoint(endpoint)
        .with_allow_http(endpoint.starts_with("http://"))
        .with_region(&storage.region)
        .with_access_key_id(access_key)
        .with_secret_access_key(secret_key)
        // Path-style addressing, required for MinIO
        .with_virtual_hosted_style_request(false)
        .build()
        .map_err(|e| Error::Iceberg(IcebergError::CatalogConnection(e.to_string())))?;

    Ok(Arc::new(store))
}
