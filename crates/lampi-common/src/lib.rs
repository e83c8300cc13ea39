//! Lampi Common Library
//!
//! Shared plumbing for the Lampi data tasks.
//!
//! # Overview
//!
//! - **Error Handling**: [`LampiError`] and the [`Result`] alias
//! - **Environment**: required/optional environment variable helpers
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use lampi_common::env::require_env;
//! use lampi_common::Result;
//!
//! fn database_host() -> Result<String> {
//!     require_env("PG_HOST")
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod env;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{LampiError, Result};
