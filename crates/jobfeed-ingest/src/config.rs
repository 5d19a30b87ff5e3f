//! Ingestion configuration
//!
//! Loaded from the environment (after reading a `.env` file, if present).
//! Unparseable numeric values fall back to their defaults; `validate` then
//! rejects combinations the pipeline cannot run with.

use std::str::FromStr;
use std::time::Duration;

use jobfeed_common::{JobFeedError, Result};
use serde::{Deserialize, Serialize};

use crate::orchestrator::PipelineSettings;
use crate::scheduler::ScheduleSettings;
use crate::tokenizer::DEFAULT_MAX_TOKEN_BYTES;

pub const DEFAULT_RECORD_ELEMENT: &str = "job";
pub const DEFAULT_ID_FIELD: &str = "guid";
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
/// Twice a day
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 12 * 60 * 60;
/// One week
pub const DEFAULT_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/jobfeed";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Smallest accepted tokenizer bound
pub const MIN_MAX_TOKEN_BYTES: usize = 64;

/// Document store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Feed document URL; only required for HTTP runs
    pub feed_url: Option<String>,
    /// Element that delimits one record
    pub record_element: String,
    /// Field holding the record identifier
    pub id_field: String,
    /// Fields a record must carry to be stored
    pub required_fields: Vec<String>,
    /// Concurrent sink writes
    pub max_in_flight: usize,
    /// Upper bound for one tag or text run
    pub max_token_bytes: usize,
    pub request_timeout_secs: u64,
    pub schedule_interval_secs: u64,
    pub run_on_start: bool,
    /// Documents not refreshed within this window expire
    pub retention_secs: u64,
    pub database: DatabaseConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            record_element: DEFAULT_RECORD_ELEMENT.to_string(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            required_fields: Vec::new(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_token_bytes: DEFAULT_MAX_TOKEN_BYTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            schedule_interval_secs: DEFAULT_SCHEDULE_INTERVAL_SECS,
            run_on_start: true,
            retention_secs: DEFAULT_RETENTION_SECS,
            database: DatabaseConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load `.env` (if any), then read the environment and validate.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Read the environment and validate.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let parsed = |key: &str| Parsed(lookup(key));

        let config = Self {
            feed_url: lookup("JOBFEED_FEED_URL").filter(|url| !url.trim().is_empty()),
            record_element: lookup("JOBFEED_RECORD_ELEMENT").unwrap_or(defaults.record_element),
            id_field: lookup("JOBFEED_ID_FIELD").unwrap_or(defaults.id_field),
            required_fields: lookup("JOBFEED_REQUIRED_FIELDS")
                .map(|list| parse_field_list(&list))
                .unwrap_or_default(),
            max_in_flight: parsed("JOBFEED_MAX_IN_FLIGHT").or(defaults.max_in_flight),
            max_token_bytes: parsed("JOBFEED_MAX_TOKEN_BYTES").or(defaults.max_token_bytes),
            request_timeout_secs: parsed("JOBFEED_REQUEST_TIMEOUT_SECS")
                .or(defaults.request_timeout_secs),
            schedule_interval_secs: parsed("JOBFEED_SCHEDULE_INTERVAL_SECS")
                .or(defaults.schedule_interval_secs),
            run_on_start: parsed("JOBFEED_RUN_ON_START").or(defaults.run_on_start),
            retention_secs: parsed("JOBFEED_RETENTION_SECS").or(defaults.retention_secs),
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parsed("DATABASE_MAX_CONNECTIONS")
                    .or(defaults.database.max_connections),
                connect_timeout_secs: parsed("DATABASE_CONNECT_TIMEOUT_SECS")
                    .or(defaults.database.connect_timeout_secs),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.record_element.trim().is_empty() {
            return Err(JobFeedError::config("JOBFEED_RECORD_ELEMENT must not be empty"));
        }
        if self.id_field.trim().is_empty() {
            return Err(JobFeedError::config("JOBFEED_ID_FIELD must not be empty"));
        }
        if self.record_element == self.id_field {
            return Err(JobFeedError::config(format!(
                "JOBFEED_ID_FIELD must differ from JOBFEED_RECORD_ELEMENT (both are '{}')",
                self.id_field
            )));
        }
        if self.max_in_flight == 0 {
            return Err(JobFeedError::config("JOBFEED_MAX_IN_FLIGHT must be greater than 0"));
        }
        if self.max_token_bytes < MIN_MAX_TOKEN_BYTES {
            return Err(JobFeedError::config(format!(
                "JOBFEED_MAX_TOKEN_BYTES must be at least {MIN_MAX_TOKEN_BYTES}"
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(JobFeedError::config(
                "JOBFEED_REQUEST_TIMEOUT_SECS must be greater than 0",
            ));
        }
        if self.schedule_interval_secs == 0 {
            return Err(JobFeedError::config(
                "JOBFEED_SCHEDULE_INTERVAL_SECS must be greater than 0",
            ));
        }
        if self.retention_secs == 0 {
            return Err(JobFeedError::config("JOBFEED_RETENTION_SECS must be greater than 0"));
        }
        if self.database.max_connections == 0 {
            return Err(JobFeedError::config("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            record_element: self.record_element.clone(),
            id_field: self.id_field.clone(),
            max_in_flight: self.max_in_flight,
            max_token_bytes: self.max_token_bytes,
        }
    }

    pub fn schedule_settings(&self) -> ScheduleSettings {
        ScheduleSettings {
            interval: Duration::from_secs(self.schedule_interval_secs),
            run_on_start: self.run_on_start,
            retention: self.retention(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Raw environment value, parsed on demand with fallback to a default
struct Parsed(Option<String>);

impl Parsed {
    fn or<T: FromStr>(self, default: T) -> T {
        self.0
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }
}

fn parse_field_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<IngestConfig> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.record_element, "job");
        assert_eq!(config.id_field, "guid");
        assert_eq!(config.max_in_flight, 1);
        assert_eq!(config.max_token_bytes, 8 * 1024 * 1024);
        assert_eq!(config.schedule_interval_secs, 43_200);
        assert_eq!(config.retention_secs, 604_800);
        assert!(config.run_on_start);
        assert!(config.feed_url.is_none());
        assert!(config.required_fields.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("JOBFEED_FEED_URL", "https://feeds.example.com/jobs.xml"),
            ("JOBFEED_RECORD_ELEMENT", "listing"),
            ("JOBFEED_ID_FIELD", "id"),
            ("JOBFEED_REQUIRED_FIELDS", " title, company ,,"),
            ("JOBFEED_MAX_IN_FLIGHT", "8"),
            ("JOBFEED_RUN_ON_START", "false"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
        ])
        .unwrap();

        assert_eq!(config.feed_url.as_deref(), Some("https://feeds.example.com/jobs.xml"));
        assert_eq!(config.record_element, "listing");
        assert_eq!(config.required_fields, vec!["title", "company"]);
        assert_eq!(config.max_in_flight, 8);
        assert!(!config.run_on_start);
        assert_eq!(config.database.max_connections, 12);
    }

    #[test]
    fn test_garbage_numbers_fall_back() {
        let config = load(&[("JOBFEED_MAX_IN_FLIGHT", "lots")]).unwrap();
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
    }

    #[test]
    fn test_rejects_zero_in_flight() {
        let err = load(&[("JOBFEED_MAX_IN_FLIGHT", "0")]).unwrap_err();
        assert!(err.to_string().contains("JOBFEED_MAX_IN_FLIGHT"));
    }

    #[test]
    fn test_rejects_identical_record_and_id() {
        let err = load(&[("JOBFEED_RECORD_ELEMENT", "guid")]).unwrap_err();
        assert!(matches!(err, JobFeedError::Config(_)));
    }

    #[test]
    fn test_rejects_tiny_token_bound() {
        assert!(load(&[("JOBFEED_MAX_TOKEN_BYTES", "63")]).is_err());
        assert!(load(&[("JOBFEED_MAX_TOKEN_BYTES", "64")]).is_ok());
    }

    #[test]
    fn test_rejects_zero_durations() {
        assert!(load(&[("JOBFEED_RETENTION_SECS", "0")]).is_err());
        assert!(load(&[("JOBFEED_SCHEDULE_INTERVAL_SECS", "0")]).is_err());
        assert!(load(&[("JOBFEED_REQUEST_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn test_empty_feed_url_is_none() {
        let config = load(&[("JOBFEED_FEED_URL", "  ")]).unwrap();
        assert!(config.feed_url.is_none());
    }

    #[test]
    fn test_settings_projection() {
        let config = load(&[("JOBFEED_MAX_IN_FLIGHT", "4")]).unwrap();
        let pipeline = config.pipeline_settings();
        assert_eq!(pipeline.max_in_flight, 4);
        assert_eq!(pipeline.record_element, "job");

        let schedule = config.schedule_settings();
        assert_eq!(schedule.interval, Duration::from_secs(43_200));
        assert_eq!(schedule.retention, Duration::from_secs(604_800));
    }
}
