//! Common types used across the jobfeed crates

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Default page number for listing queries (1-based).
pub const DEFAULT_PAGE: u32 = 1;

/// Default page size for listing queries.
pub const DEFAULT_PAGE_LIMIT: u32 = 15;

/// Ordered mapping from field name to accumulated text value.
///
/// Fields keep the order in which they first appeared in the feed. Text for
/// the same field may arrive in several chunks; each chunk is trimmed before
/// it is appended, so whitespace between chunks is not significant.
///
/// # Examples
///
/// ```
/// use jobfeed_common::FieldMap;
///
/// let mut fields = FieldMap::new();
/// fields.append("title", "\n  Senior ");
/// fields.append("title", " Baker\n");
///
/// assert_eq!(fields.get("title"), Some("SeniorBaker"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(IndexMap<String, String>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text chunk to `name`, creating the field if needed.
    pub fn append(&mut self, name: &str, chunk: &str) {
        let trimmed = chunk.trim();
        match self.0.get_mut(name) {
            Some(value) => value.push_str(trimmed),
            None => {
                self.0.insert(name.to_string(), trimmed.to_string());
            },
        }
    }

    /// Set a field, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A job document as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    /// Feed-provided identifier (the upsert key)
    pub identifier: String,

    /// Fields of the most recent write
    pub fields: FieldMap,

    /// SHA-256 fingerprint of `fields`
    pub content_sha256: String,

    /// First time this identifier was written
    pub created_at: DateTime<Utc>,

    /// Last time the fields actually changed
    pub updated_at: DateTime<Utc>,

    /// Last time the identifier was seen in a feed run; drives TTL expiry
    pub refreshed_at: DateTime<Utc>,
}

/// Page-based pagination for listing stored jobs.
///
/// # Examples
///
/// ```
/// use jobfeed_common::Pagination;
///
/// let page = Pagination::new(3, 20);
/// assert_eq!(page.offset(), 40);
///
/// // Non-positive values fall back to the defaults.
/// assert_eq!(Pagination::new(0, 0), Pagination::default());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number
    pub page: u32,

    /// Maximum number of items per page
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: if page == 0 { DEFAULT_PAGE } else { page },
            limit: if limit == 0 { DEFAULT_PAGE_LIMIT } else { limit },
        }
    }

    /// Number of items to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}
