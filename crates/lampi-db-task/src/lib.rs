//! Lampi DB task
//!
//! Restores the Koodisto export from object storage into PostgreSQL in one
//! transaction: the manifest names a schema script and a set of CSV files, the
//! target schema is dropped and recreated from the script, and every CSV file
//! is streamed into its table with `COPY ... FROM STDIN`. Either everything is
//! committed or nothing is.
//!
//! # Example
//!
//! ```no_run
//! use lampi_db_task::{config::Config, restore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let report = restore(config).await?;
//!     println!("restored {} rows", report.total_rows());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod import;
pub mod manifest;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod task_status;

use std::sync::Arc;

pub use coordinator::{RestoreReport, TransactionCoordinator};
pub use error::{RestoreError, RestoreResult};
pub use manifest::{FileRef, Manifest, TableImportJob};
pub use storage::{ObjectStore, S3Storage};

/// Validate `config`, then restore with an S3 client built from it.
pub async fn restore(config: config::Config) -> RestoreResult<RestoreReport> {
    config.validate()?;
    let storage = S3Storage::new(config.storage).await?;
    TransactionCoordinator::new(Arc::new(storage), config.database, config.restore)
        .run()
        .await
}
