//! Sirene Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared pieces used by every member of the SIRENE ingestion workspace.
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Errors**: the error type for this shared layer
//!
//! # Example
//!
//! ```no_run
//! use sirene_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> sirene_common::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("logging ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
