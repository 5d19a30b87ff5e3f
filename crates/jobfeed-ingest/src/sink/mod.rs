//! Upsert sinks
//!
//! A sink stores one document per identifier. Writing an identifier that
//! already exists replaces its fields wholesale (last write wins); writing
//! identical content again leaves the document's content untouched but still
//! refreshes it, which keeps it alive for expiry purposes.

use std::time::Duration;

use async_trait::async_trait;
use jobfeed_common::FieldMap;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;

mod memory;
#[cfg(feature = "database")]
mod postgres;
mod validating;

pub use memory::MemorySink;
#[cfg(feature = "database")]
pub use postgres::PgSink;
pub use validating::ValidatingSink;

/// What an upsert did to the stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Written {
    /// No document existed for the identifier
    Created,
    /// The stored fields were replaced with different content
    Replaced,
    /// The incoming fields matched the stored ones
    Unchanged,
}

impl Written {
    /// Classify a write from the previous fingerprint, if any.
    pub fn classify(previous: Option<&str>, incoming: &str) -> Self {
        match previous {
            None => Written::Created,
            Some(previous) if previous == incoming => Written::Unchanged,
            Some(_) => Written::Replaced,
        }
    }
}

/// Idempotent document store keyed by record identifier.
#[async_trait]
pub trait UpsertSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Create or replace the document for `identifier`.
    async fn upsert(&self, identifier: &str, fields: &FieldMap) -> Result<Written, SinkError>;

    /// Remove documents not refreshed within `retention`; returns how many.
    ///
    /// Stores without expiry keep everything.
    async fn purge_expired(&self, retention: Duration) -> Result<u64, SinkError> {
        let _ = retention;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Written::classify(None, "abc"), Written::Created);
        assert_eq!(Written::classify(Some("abc"), "abc"), Written::Unchanged);
        assert_eq!(Written::classify(Some("abc"), "def"), Written::Replaced);
    }
}
