//! Required-field enforcement in front of another sink

use std::time::Duration;

use async_trait::async_trait;
use jobfeed_common::FieldMap;

use super::{UpsertSink, Written};
use crate::error::SinkError;

/// Rejects records that lack any of the required fields, or carry them empty.
///
/// Rejections surface as per-record validation errors; the wrapped sink is not
/// called for them.
#[derive(Debug)]
pub struct ValidatingSink<S> {
    inner: S,
    required: Vec<String>,
}

impl<S: UpsertSink> ValidatingSink<S> {
    pub fn new(inner: S, required: Vec<String>) -> Self {
        Self { inner, required }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn missing<'a>(&'a self, fields: &FieldMap) -> Vec<&'a str> {
        self.required
            .iter()
            .filter(|name| fields.get(name).is_none_or(str::is_empty))
            .map(String::as_str)
            .collect()
    }
}

#[async_trait]
impl<S: UpsertSink> UpsertSink for ValidatingSink<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn upsert(&self, identifier: &str, fields: &FieldMap) -> Result<Written, SinkError> {
        let missing = self.missing(fields);
        if !missing.is_empty() {
            return Err(SinkError::validation(
                identifier,
                format!("missing required field(s): {}", missing.join(", ")),
            ));
        }
        self.inner.upsert(identifier, fields).await
    }

    async fn purge_expired(&self, retention: Duration) -> Result<u64, SinkError> {
        self.inner.purge_expired(retention).await
    }
}
