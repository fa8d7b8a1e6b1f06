//! Persistence for settings, connectivity periods, raw samples and speed tests
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` lets the loops run against SQLite or memory
//! - **Async**: every operation is async so it can be awaited inside the tokio loops
//! - **Atomic**: every operation is individually atomic; period flips run in one transaction
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database with WAL, migrations under `migrations/`
//! - **In-Memory**: no persistence, used by tests and `"backend": "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use linkwatch::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./data/linkwatch.db").await?;
//!     let open = backend.get_open_period().await?;
//!     println!("{open:?}");
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, QueryRange, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{ConnectivityCheck, ConnectivityPeriod, Setting, SpeedTestRecord};
