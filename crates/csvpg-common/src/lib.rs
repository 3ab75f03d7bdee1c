//! csvpg Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the csvpg workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `CommonError` and the `Result` alias
//! - **Environment**: typed lookups of environment variables with defaults
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use csvpg_common::env;
//! use csvpg_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let retries: u32 = env::parse_or("DAG_RETRIES", 5)?;
//!     tracing::info!(retries, "Loaded settings");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
