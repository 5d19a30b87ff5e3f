//! Jobfeed Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the jobfeed workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `JobFeedError` and the crate `Result` alias
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Types**: `FieldMap`, `StoredJob` and `Pagination`
//! - **Checksums**: content fingerprints used to detect unchanged documents
//!
//! # Example
//!
//! ```
//! use jobfeed_common::{checksum::fingerprint, FieldMap};
//!
//! let mut fields = FieldMap::new();
//! fields.append("guid", "  A1 ");
//! fields.append("title", "Baker");
//!
//! assert_eq!(fields.get("guid"), Some("A1"));
//! assert_eq!(fingerprint(&fields).len(), 64);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{JobFeedError, Result};
pub use types::{FieldMap, Pagination, StoredJob};
