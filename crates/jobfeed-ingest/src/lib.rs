//! Jobfeed Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streams a job-listing XML feed into an idempotent document store.
//!
//! # Pipeline
//!
//! - **Source**: delivers the feed as arbitrary byte chunks ([`source`])
//! - **Tokenizer**: turns chunks into open/text/close events ([`tokenizer`])
//! - **Assembler**: folds events into flat records ([`assembler`])
//! - **Sink**: upserts records keyed by identifier ([`sink`])
//! - **Orchestrator**: wires the stages for one run ([`orchestrator`]), and the
//!   [`scheduler`] repeats runs on an interval
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use jobfeed_ingest::{
//!     IngestOrchestrator, MemoryFeedSource, MemorySink, PipelineSettings, RunState,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let feed = "<jobs><job><guid>A1</guid><title>Baker</title></job></jobs>";
//! let sink = Arc::new(MemorySink::new());
//! let orchestrator = IngestOrchestrator::new(PipelineSettings::default(), sink.clone());
//!
//! let summary = orchestrator
//!     .run(&MemoryFeedSource::new(feed, 7), CancellationToken::new())
//!     .await?;
//!
//! assert_eq!(summary.state, RunState::Completed);
//! assert_eq!(summary.records_upserted, 1);
//! assert!(sink.get("A1").await.is_some());
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod summary;
pub mod tokenizer;

pub use assembler::{Assembled, Record, RecordAssembler};
pub use config::{DatabaseConfig, IngestConfig};
pub use error::{
    IngestError, MalformedReason, MalformedXmlError, RunAborted, SinkError, SinkErrorKind,
    TransportError,
};
pub use orchestrator::{IngestOrchestrator, PipelineSettings};
pub use scheduler::{FeedScheduler, ScheduleSettings};
#[cfg(feature = "database")]
pub use sink::PgSink;
pub use sink::{MemorySink, UpsertSink, ValidatingSink, Written};
pub use source::{ByteStream, FeedSource, FileFeedSource, HttpFeedSource, MemoryFeedSource};
pub use summary::{RunState, RunSummary};
pub use tokenizer::{RawEvent, XmlTokenizer};
