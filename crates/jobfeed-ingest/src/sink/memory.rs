//! In-process sink
//!
//! Holds documents in insertion order behind an async lock. Used for dry runs
//! and as the reference store in tests, so it also supports failure injection
//! and artificial write latency.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use jobfeed_common::{checksum::fingerprint, FieldMap, Pagination, StoredJob};
use tokio::sync::RwLock;

use super::{UpsertSink, Written};
use crate::error::{SinkError, SinkErrorKind};

type LatencyFn = Arc<dyn Fn(&str, &FieldMap) -> Duration + Send + Sync>;

#[derive(Default)]
pub struct MemorySink {
    documents: RwLock<IndexMap<String, StoredJob>>,
    failing: RwLock<HashSet<String>>,
    attempts: AtomicU64,
    latency: Option<LatencyFn>,
}

impl std::fmt::Debug for MemorySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySink")
            .field("attempts", &self.attempts.load(Ordering::Relaxed))
            .field("latency", &self.latency.is_some())
            .finish_non_exhaustive()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every write by a per-record amount before it is applied.
    pub fn with_latency<F>(mut self, latency: F) -> Self
    where
        F: Fn(&str, &FieldMap) -> Duration + Send + Sync + 'static,
    {
        self.latency = Some(Arc::new(latency));
        self
    }

    /// Reject every future write for `identifier`.
    pub async fn fail_on(&self, identifier: impl Into<String>) {
        self.failing.write().await.insert(identifier.into());
    }

    pub async fn get(&self, identifier: &str) -> Option<StoredJob> {
        self.documents.read().await.get(identifier).cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Number of upsert calls received, failed ones included
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Identifiers in first-write order
    pub async fn identifiers(&self) -> Vec<String> {
        self.documents.read().await.keys().cloned().collect()
    }

    /// Newest documents first, by creation time.
    pub async fn list_page(&self, page: Pagination) -> Vec<StoredJob> {
        let documents = self.documents.read().await;
        let mut jobs: Vec<&StoredJob> = documents.values().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        jobs.into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.limit as usize)
            .cloned()
            .collect()
    }

    /// Drop documents last refreshed before `cutoff`.
    pub async fn purge_refreshed_before(&self, cutoff: DateTime<Utc>) -> u64 {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|_, job| job.refreshed_at >= cutoff);
        (before - documents.len()) as u64
    }
}

#[async_trait]
impl UpsertSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, identifier: &str, fields: &FieldMap) -> Result<Written, SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = &self.latency {
            let delay = latency(identifier, fields);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if self.failing.read().await.contains(identifier) {
            return Err(SinkError::new(
                identifier,
                SinkErrorKind::Unavailable("write rejected".to_string()),
            ));
        }

        let content_sha256 = fingerprint(fields);
        let now = Utc::now();
        let mut documents = self.documents.write().await;

        let written = match documents.get_mut(identifier) {
            Some(existing) => {
                let written = Written::classify(Some(&existing.content_sha256), &content_sha256);
                if written == Written::Replaced {
                    existing.fields = fields.clone();
                    existing.content_sha256 = content_sha256;
                    existing.updated_at = now;
                }
                existing.refreshed_at = now;
                written
            },
            None => {
                documents.insert(
                    identifier.to_string(),
                    StoredJob {
                        identifier: identifier.to_string(),
                        fields: fields.clone(),
                        content_sha256,
                        created_at: now,
                        updated_at: now,
                        refreshed_at: now,
                    },
                );
                Written::Created
            },
        };

        Ok(written)
    }

    async fn purge_expired(&self, retention: Duration) -> Result<u64, SinkError> {
        let retention = chrono::Duration::from_std(retention).map_err(|e| {
            SinkError::new("*", SinkErrorKind::Unavailable(format!("invalid retention: {e}")))
        })?;
        Ok(self.purge_refreshed_before(Utc::now() - retention).await)
    }
}
