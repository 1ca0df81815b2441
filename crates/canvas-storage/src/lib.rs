//! Storage coordination and versioning for architecture canvases.
//!
//! Splits each canvas across a metadata store (small rows addressed by
//! partition and sort key) and a blob store (code artifacts and chat
//! transcripts), keeps the two consistent, and enforces the mutable-draft /
//! immutable-version lifecycle.
//!
//! # Architecture
//!
//! - **Adapters** ([`MetadataStore`], [`BlobStore`]) are thin traits with
//!   in-memory, SQLite and filesystem backends, wrapped in [`Retrying`] for
//!   bounded backoff on transient faults.
//! - **Repositories** combine the adapters per entity kind. Blobs are written
//!   before the rows that reference them.
//! - **[`VersionManager`]** guards every write and promotes the draft to
//!   immutable versions.
//! - **[`CanvasCoordinator`]** is the facade external callers use.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`config`]: StorageConfig and RetryPolicy
//! - [`keys`]: metadata and blob key conventions
//! - [`metadata`]: MetadataStore trait and backends
//! - [`blob`]: BlobStore trait and backends
//! - [`schema`]: SQLite migrations for the metadata backend
//! - [`retry`]: retry wrapper for any adapter
//! - [`rows`]: persisted row shapes
//! - [`repo`]: node, edge, chat thread and canvas repositories
//! - [`version`]: mutability guard, promotion, listing and teardown
//! - [`coordinator`]: CanvasCoordinator facade
//! - [`stores`]: the metadata and blob handle pair shared by repositories
//! - [`cancel`]: CancelToken
//! - `instrumented`: counting and fault-injecting adapters for tests
//!   (`test-util` feature)

pub mod blob;
pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod instrumented;
pub mod keys;
pub mod metadata;
pub mod repo;
pub mod retry;
pub mod rows;
pub mod schema;
pub mod stores;
pub mod version;

// Re-export key types for ergonomic use.
pub use blob::fs::FsBlobStore;
pub use blob::memory::InMemoryBlobStore;
pub use blob::BlobStore;
pub use cancel::CancelToken;
pub use config::{RetryPolicy, StorageConfig};
pub use coordinator::CanvasCoordinator;
pub use error::StorageError;
pub use metadata::memory::InMemoryMetadataStore;
pub use metadata::sqlite::SqliteMetadataStore;
pub use metadata::{ItemKey, MetadataItem, MetadataStore, Table};
pub use retry::Retrying;
pub use stores::Stores;
pub use version::{validate_version_mutable, GcReport, VersionInfo, VersionManager};
