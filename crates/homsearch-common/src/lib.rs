//! Homsearch Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the homsearch workspace.
//!
//! # Overview
//!
//! This crate provides functionality used by every homsearch component that
//! drives per-query work (the search backend library and its CLI):
//!
//! - **Error Handling**: Common error type and result alias
//! - **Logging**: `tracing` subscriber initialisation from config or environment
//! - **Types**: Query formats, profile-construction methods and artifact kinds
//!
//! # Example
//!
//! ```no_run
//! use homsearch_common::types::QueryFormat;
//!
//! let format: QueryFormat = "a3m".parse().unwrap();
//! assert_eq!(format.extension(), "a3m");
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::{ArtifactKind, Method, QueryFormat};
