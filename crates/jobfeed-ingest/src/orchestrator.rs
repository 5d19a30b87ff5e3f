//! Ingestion orchestrator
//!
//! Drives one run end to end: opens the source, feeds every chunk through the
//! tokenizer and assembler as it arrives, and hands completed records to the
//! sink. Sink failures are per record and never stop a run; transport and
//! parse failures abort it. Either way every write already handed to the sink
//! is awaited and counted before the run returns.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::assembler::{Assembled, Record, RecordAssembler};
use crate::config::{DEFAULT_ID_FIELD, DEFAULT_MAX_IN_FLIGHT, DEFAULT_RECORD_ELEMENT};
use crate::error::{IngestError, RunAborted, SinkError, SinkErrorKind};
use crate::sink::{UpsertSink, Written};
use crate::source::FeedSource;
use crate::summary::{RunState, RunSummary};
use crate::tokenizer::{RawEvent, XmlTokenizer, DEFAULT_MAX_TOKEN_BYTES};

/// How records are recognised and written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub record_element: String,
    pub id_field: String,
    /// Concurrent sink writes; writes for one identifier never overlap
    pub max_in_flight: usize,
    pub max_token_bytes: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            record_element: DEFAULT_RECORD_ELEMENT.to_string(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_token_bytes: DEFAULT_MAX_TOKEN_BYTES,
        }
    }
}

/// Runs feed ingestion against one sink, one run at a time.
pub struct IngestOrchestrator {
    settings: PipelineSettings,
    sink: Arc<dyn UpsertSink>,
    state: AtomicU8,
}

impl IngestOrchestrator {
    pub fn new(settings: PipelineSettings, sink: Arc<dyn UpsertSink>) -> Self {
        Self {
            settings,
            sink,
            state: AtomicU8::new(RunState::NotStarted.as_u8()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn sink(&self) -> &Arc<dyn UpsertSink> {
        &self.sink
    }

    /// State of the current or most recent run
    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Ingest the feed once.
    ///
    /// Returns the summary of a completed run, or the partial summary and the
    /// cause of an aborted one. Fails with [`IngestError::AlreadyRunning`]
    /// without touching the active run if one is in progress.
    #[instrument(skip_all, fields(source = %source.describe(), sink = self.sink.name()))]
    pub async fn run(
        &self,
        source: &dyn FeedSource,
        cancel: CancellationToken,
    ) -> Result<RunSummary, RunAborted> {
        let running = RunState::Running.as_u8();
        let claimed = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != running).then_some(running)
            })
            .is_ok();
        if !claimed {
            warn!("Refusing to start a feed run while another is in progress");
            return Err(RunAborted {
                summary: RunSummary::default(),
                error: IngestError::AlreadyRunning,
            });
        }

        let mut summary = RunSummary::start();
        info!("Feed run started");

        let outcome = self.execute(source, &cancel, &mut summary).await;
        let state = match outcome {
            Ok(()) => RunState::Completed,
            Err(_) => RunState::Aborted,
        };
        summary.finish(state);
        self.state.store(state.as_u8(), Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                info!(
                    seen = summary.records_seen,
                    upserted = summary.records_upserted,
                    skipped = summary.records_skipped,
                    failed = summary.records_failed,
                    created = summary.records_created,
                    replaced = summary.records_replaced,
                    unchanged = summary.records_unchanged,
                    bytes = summary.bytes_received,
                    duration_secs = summary.duration_secs,
                    "Feed run completed"
                );
                Ok(summary)
            },
            Err(error) => {
                error!(
                    error = %error,
                    seen = summary.records_seen,
                    upserted = summary.records_upserted,
                    failed = summary.records_failed,
                    bytes = summary.bytes_received,
                    "Feed run aborted"
                );
                Err(RunAborted { summary, error })
            },
        }
    }

    async fn execute(
        &self,
        source: &dyn FeedSource,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<(), IngestError> {
        let mut run = ActiveRun {
            assembler: RecordAssembler::new(
                self.settings.record_element.as_str(),
                self.settings.id_field.as_str(),
            ),
            dispatcher: Dispatcher::new(Arc::clone(&self.sink), self.settings.max_in_flight),
            summary,
            cancel,
        };

        let result = self.stream_records(source, &mut run).await;
        run.dispatcher.drain(run.summary).await;
        result
    }

    async fn stream_records(
        &self,
        source: &dyn FeedSource,
        run: &mut ActiveRun<'_>,
    ) -> Result<(), IngestError> {
        let cancel = run.cancel;
        let mut tokenizer = XmlTokenizer::with_limit(self.settings.max_token_bytes);

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            opened = source.open() => opened?,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                next = stream.next() => next,
            };

            let chunk = match next {
                Some(chunk) => chunk?,
                None => break,
            };
            if chunk.is_empty() {
                continue;
            }

            run.summary.add_bytes(chunk.len());
            run.accept(tokenizer.feed(&chunk)?).await?;
            // Records completed ahead of a malformed construct are dispatched first
            if let Some(err) = tokenizer.error() {
                return Err(err.into());
            }
        }

        run.accept(tokenizer.finish()?).await?;

        if let Some(fields) = run.assembler.abandon() {
            run.summary.record_seen();
            run.summary.record_skipped();
            warn!(
                record_element = %self.settings.record_element,
                fields = fields.len(),
                "Feed ended inside an unclosed record; record dropped"
            );
        }
        Ok(())
    }
}

/// Per-run pipeline state downstream of the tokenizer
struct ActiveRun<'a> {
    assembler: RecordAssembler,
    dispatcher: Dispatcher,
    summary: &'a mut RunSummary,
    cancel: &'a CancellationToken,
}

impl ActiveRun<'_> {
    async fn accept<I>(&mut self, events: I) -> Result<(), IngestError>
    where
        I: IntoIterator<Item = RawEvent>,
        I::IntoIter: Send,
    {
        for event in events {
            let Some(assembled) = self.assembler.push(event) else {
                continue;
            };

            self.summary.record_seen();
            match assembled {
                Assembled::Record(record) => self.dispatcher.dispatch(record, self.summary).await,
                Assembled::Skipped { fields } => {
                    self.summary.record_skipped();
                    debug!(fields = fields.len(), "Skipping record without identifier");
                },
            }

            if self.cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
        }
        Ok(())
    }
}

type WriteOutcome = (String, Result<Written, SinkError>);

/// Bounded set of in-flight sink writes, at most one per identifier.
struct Dispatcher {
    sink: Arc<dyn UpsertSink>,
    limit: usize,
    in_flight: FuturesUnordered<JoinHandle<WriteOutcome>>,
    keys: HashSet<String>,
}

impl Dispatcher {
    fn new(sink: Arc<dyn UpsertSink>, limit: usize) -> Self {
        Self {
            sink,
            limit: limit.max(1),
            in_flight: FuturesUnordered::new(),
            keys: HashSet::new(),
        }
    }

    async fn dispatch(&mut self, record: Record, summary: &mut RunSummary) {
        while self.in_flight.len() >= self.limit || self.keys.contains(&record.identifier) {
            if !self.settle_one(summary).await {
                break;
            }
        }

        self.keys.insert(record.identifier.clone());
        let sink = Arc::clone(&self.sink);

        self.in_flight.push(tokio::spawn(async move {
            let outcome = AssertUnwindSafe(sink.upsert(&record.identifier, &record.fields))
                .catch_unwind()
                .await;
            let result = outcome.unwrap_or_else(|_| {
                Err(SinkError::new(
                    record.identifier.as_str(),
                    SinkErrorKind::Unavailable("sink write panicked".to_string()),
                ))
            });
            (record.identifier, result)
        }));
    }

    /// Wait for one write and account for it; false when nothing is in flight.
    async fn settle_one(&mut self, summary: &mut RunSummary) -> bool {
        let Some(joined) = self.in_flight.next().await else {
            return false;
        };

        match joined {
            Ok((identifier, Ok(written))) => {
                self.keys.remove(&identifier);
                summary.record_written(written);
                debug!(identifier = %identifier, ?written, "Record stored");
            },
            Ok((identifier, Err(err))) => {
                self.keys.remove(&identifier);
                summary.record_failed();
                warn!(
                    identifier = %err.identifier,
                    error = %err.kind,
                    "Record not stored; continuing"
                );
            },
            Err(err) => {
                summary.record_failed();
                error!(error = %err, "Sink write task failed");
            },
        }
        true
    }

    async fn drain(&mut self, summary: &mut RunSummary) {
        while self.settle_one(summary).await {}
    }
}
