//! Catalog implementations.
//!
//! The `Catalog` trait abstracts the metadata side of the table: namespace
//! and table lifecycle plus atomic append commits with compare-and-set
//! semantics. `RestCatalog` speaks the Iceberg REST Catalog API;
//! `MemoryCatalog` backs tests and local development with the same CAS
//! behavior over in-process state.

use crate::error::{Error, IcebergError, Result};
use crate::iceberg::rest;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

/// An append-only snapshot commit.
#[derive(Debug, Clone)]
pub struct AppendCommit {
    /// Expected current snapshot ID (CAS); `None` on a fresh table
    pub expected_snapshot_id: Option<i64>,
    /// Sequence number for the new snapshot
    pub sequence_number: i64,
    /// Snapshot summary properties
    pub summary: HashMap<String, String>,
}

/// Catalog operations used by the appender.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Create the namespace if it does not exist.
    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;

    /// Check whether a table exists.
    async fn table_exists(&self, namespace: &str, table: &str) -> Result<bool>;

    /// Create a table with the given schema.
    async fn create_table(
        &self,
        namespace: &str,
        table: &str,
        schema: rest::Schema,
    ) -> Result<()>;

    /// Load the current table metadata.
    async fn load_metadata(&self, namespace: &str, table: &str) -> Result<rest::TableMetadata>;

    /// Commit an append snapshot atomically. Returns the new snapshot ID.
    ///
    /// A concurrent writer surfaces as `IcebergError::CommitConflict`.
    async fn commit_append(
        &self,
        namespace: &str,
        table: &str,
        commit: AppendCommit,
    ) -> Result<i64>;
}

/// REST catalog client.
pub struct RestCatalog {
    client: Client,
    base_uri: String,
}

impl RestCatalog {
    /// Create a client for the given catalog base URL.
    pub fn new(base_uri: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                Error::Iceberg(IcebergError::CatalogConnection(format!(
                    "Failed to create HTTP client: {}",
                    e
                )))
            })?;

        Ok(Self {
            client,
            base_uri: base_uri.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_uri, path)
    }

    fn table_path(&self, namespace: &str, table: &str) -> String {
        format!(
            "/v1/namespaces/{}/tables/{}",
            urlencoding::encode(namespace),
            urlencoding::encode(table)
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .map_err(|e| Error::Iceberg(IcebergError::CatalogUnavailable(e.to_string())))
    }

    /// Map a non-success response to the error taxonomy.
    async fn handle_error(
        &self,
        response: reqwest::Response,
        expected_snapshot_id: Option<i64>,
    ) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<rest::ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        match status {
            StatusCode::CONFLICT => Error::Iceberg(IcebergError::CommitConflict {
                expected: expected_snapshot_id,
            }),
            StatusCode::NOT_FOUND => Error::Iceberg(IcebergError::TableNotFound(message)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::Iceberg(IcebergError::Unauthorized(message))
            }
            status if status.is_server_error() => {
                Error::Iceberg(IcebergError::CatalogUnavailable(format!(
                    "{}: {}",
                    status, message
                )))
            }
            status => Error::Iceberg(IcebergError::Other(format!("{}: {}", status, message))),
        }
    }
}

#[async_trait]
impl Catalog for RestCatalog {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let body = rest::CreateNamespaceRequest {
            namespace: namespace.split('.').map(str::to_string).collect(),
            properties: HashMap::new(),
        };

        let response = self
            .send(self.client.post(self.url("/v1/namespaces")).json(&body))
            .await?;

        match response.status() {
            status if status.is_success() => {
                info!(namespace = %namespace, "Created namespace");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(namespace = %namespace, "Namespace already exists");
                Ok(())
            }
            _ => Err(self.handle_error(response, None).await),
        }
    }

    async fn table_exists(&self, namespace: &str, table: &str) -> Result<bool> {
        let response = self
            .send(self.client.head(self.url(&self.table_path(namespace, table))))
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.handle_error(response, None).await),
        }
    }

    async fn create_table(
        &self,
        namespace: &str,
        table: &str,
        schema: rest::Schema,
    ) -> Result<()> {
        let path = format!("/v1/namespaces/{}/tables", urlencoding::encode(namespace));
        let body = rest::CreateTableRequest {
            name: table.to_string(),
            location: None,
            schema,
            properties: HashMap::new(),
        };

        let response = self
            .send(self.client.post(self.url(&path)).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, None).await);
        }

        info!(namespace = %namespace, table = %table, "Created table");
        Ok(())
    }

    async fn load_metadata(&self, namespace: &str, table: &str) -> Result<rest::TableMetadata> {
        let response = self
            .send(self.client.get(self.url(&self.table_path(namespace, table))))
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, None).await);
        }

        let loaded: rest::LoadTableResponse = response
            .json()
            .await
            .map_err(|e| Error::Iceberg(IcebergError::Other(e.to_string())))?;

        Ok(loaded.metadata)
    }

    async fn commit_append(
        &self,
        namespace: &str,
        table: &str,
        commit: AppendCommit,
    ) -> Result<i64> {
        let snapshot_id = Utc::now().timestamp_millis();
        let manifest_list = format!(
            "metadata/snap-{}-{}.avro",
            snapshot_id,
            uuid::Uuid::new_v4()
        );

        let body = rest::CommitTableRequest {
            requirements: vec![rest::TableRequirement::AssertRefSnapshotId {
                ref_name: "main".to_string(),
                snapshot_id: commit.expected_snapshot_id,
            }],
            updates: vec![
                rest::TableUpdate::AddSnapshot {
                    snapshot: rest::Snapshot {
                        snapshot_id,
                        parent_snapshot_id: commit.expected_snapshot_id,
                        sequence_number: commit.sequence_number,
                        timestamp_ms: snapshot_id,
                        manifest_list,
                        summary: commit.summary,
                        schema_id: Some(0),
                    },
                },
                rest::TableUpdate::SetSnapshotRef {
                    ref_name: "main".to_string(),
                    snapshot_id,
                    ref_type: "branch".to_string(),
                },
            ],
        };

        let response = self
            .send(
                self.client
                    .post(self.url(&self.table_path(namespace, table)))
                    .json(&body),
            )
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, commit.expected_snapshot_id).await);
        }

        let committed: rest::CommitTableResponse = response
            .json()
            .await
            .map_err(|e| Error::Iceberg(IcebergError::Other(e.to_string())))?;

        let actual = committed
            .metadata
            .current_snapshot_id
            .unwrap_or(snapshot_id);

        debug!(
            namespace = %namespace,
            table = %table,
            snapshot_id = actual,
            "Snapshot committed"
        );

        Ok(actual)
    }
}

/// In-process catalog with real compare-and-set semantics.
///
/// Backs local development and tests; commits race the same way they do
/// against a remote catalog, minus the network.
#[derive(Default)]
pub struct MemoryCatalog {
    namespaces: Mutex<HashSet<String>>,
    tables: Mutex<HashMap<(String, String), rest::TableMetadata>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        self.namespaces.lock().insert(namespace.to_string());
        Ok(())
    }

    async fn table_exists(&self, namespace: &str, table: &str) -> Result<bool> {
        Ok(self
            .tables
            .lock()
            .contains_key(&(namespace.to_string(), table.to_string())))
    }

    async fn create_table(
        &self,
        namespace: &str,
        table: &str,
        schema: rest::Schema,
    ) -> Result<()> {
        let mut tables = self.tables.lock();
        let key = (namespace.to_string(), table.to_string());
        if tables.contains_key(&key) {
            return Err(Error::Iceberg(IcebergError::Other(format!(
                "Table already exists: {}.{}",
                namespace, table
            ))));
        }

        tables.insert(
            key,
            rest::TableMetadata {
                format_version: 2,
                table_uuid: uuid::Uuid::new_v4().to_string(),
                location: format!("memory://{}/{}", namespace, table),
                last_updated_ms: Utc::now().timestamp_millis(),
                schema: Some(schema),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn load_metadata(&self, namespace: &str, table: &str) -> Result<rest::TableMetadata> {
        self.tables
            .lock()
            .get(&(namespace.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::Iceberg(IcebergError::TableNotFound(format!(
                    "{}.{}",
                    namespace, table
                )))
            })
    }

    async fn commit_append(
        &self,
        namespace: &str,
        table: &str,
        commit: AppendCommit,
    ) -> Result<i64> {
        let mut tables = self.tables.lock();
        let metadata = tables
            .get_mut(&(namespace.to_string(), table.to_string()))
            .ok_or_else(|| {
                Error::Iceberg(IcebergError::TableNotFound(format!(
                    "{}.{}",
                    namespace, table
                )))
            })?;

        if metadata.current_snapshot_id != commit.expected_snapshot_id {
            return Err(Error::Iceberg(IcebergError::CommitConflict {
                expected: commit.expected_snapshot_id,
            }));
        }

        let now = Utc::now().timestamp_millis();
        // Millisecond ids collide under rapid commits; keep them unique
        let snapshot_id = metadata
            .snapshots
            .iter()
            .map(|s| s.snapshot_id)
            .max()
            .map_or(now, |max| now.max(max + 1));

        metadata.snapshots.push(rest::Snapshot {
            snapshot_id,
            parent_snapshot_id: commit.expected_snapshot_id,
            sequence_number: commit.sequence_number,
            timestamp_ms: now,
            manifest_list: format!("memory://metadata/snap-{}.avro", snapshot_id),
            summary: commit.summary,
            schema_id: Some(0),
        });
        metadata.snapshot_log.push(rest::SnapshotLogEntry {
            snapshot_id,
            timestamp_ms: now,
        });
        metadata.current_snapshot_id = Some(snapshot_id);
        metadata.last_updated_ms = now;

        Ok(snapshot_id)
    }
}
