//! Iceberg integration: REST catalog protocol, catalog implementations,
//! and the shared table client used by partition workers.

pub mod catalog;
pub mod client;
pub mod rest;

pub use catalog::{AppendCommit, Catalog, MemoryCatalog, RestCatalog};
pub use client::{IcebergClient, IcebergClientBuilder};
