//! Periodic triggering, overlap refusal and expiry

use std::sync::Arc;
use std::time::Duration;

use jobfeed_ingest::{
    FeedScheduler, IngestError, IngestOrchestrator, MemoryFeedSource, MemorySink,
    PipelineSettings, RunState, ScheduleSettings, UpsertSink,
};
use tokio_util::sync::CancellationToken;

const TWELVE_HOURS: Duration = Duration::from_secs(12 * 60 * 60);

const FEED: &str = "<jobs><job><guid>A1</guid></job><job><guid>B2</guid></job></jobs>";

fn scheduler(sink: Arc<MemorySink>, feed: &'static str, settings: ScheduleSettings) -> FeedScheduler {
    let orchestrator = Arc::new(IngestOrchestrator::new(PipelineSettings::default(), sink));
    FeedScheduler::new(orchestrator, Arc::new(MemoryFeedSource::new(feed, 8)), settings)
}

#[tokio::test(start_paused = true)]
async fn test_runs_on_start_and_every_interval() {
    let sink = Arc::new(MemorySink::new());
    let scheduler = Arc::new(scheduler(
        sink.clone(),
        FEED,
        ScheduleSettings {
            interval: TWELVE_HOURS,
            run_on_start: true,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        },
    ));

    let cancel = CancellationToken::new();
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    // Ticks at 0h, 12h and 24h
    tokio::time::sleep(TWELVE_HOURS * 2 + Duration::from_secs(60)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(sink.attempts(), 6);
    assert_eq!(sink.len().await, 2);
    assert_eq!(scheduler.orchestrator().state(), RunState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_waits_a_full_interval_without_run_on_start() {
    let sink = Arc::new(MemorySink::new());
    let scheduler = Arc::new(scheduler(
        sink.clone(),
        FEED,
        ScheduleSettings {
            interval: TWELVE_HOURS,
            run_on_start: false,
            ..ScheduleSettings::default()
        },
    ));

    let cancel = CancellationToken::new();
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    tokio::time::sleep(TWELVE_HOURS - Duration::from_secs(1)).await;
    assert_eq!(sink.attempts(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sink.attempts(), 2);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_cancelled_scheduler_stops_without_running() {
    let sink = Arc::new(MemorySink::new());
    let scheduler = scheduler(sink.clone(), FEED, ScheduleSettings::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    scheduler.run(cancel).await;

    assert_eq!(sink.attempts(), 0);
}

#[tokio::test]
async fn test_trigger_refused_while_running() {
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Arc::new(IngestOrchestrator::new(PipelineSettings::default(), sink.clone()));
    let scheduler = FeedScheduler::new(
        Arc::clone(&orchestrator),
        Arc::new(MemoryFeedSource::new(FEED, 8)),
        ScheduleSettings::default(),
    );

    // Hold the orchestrator in a run that cannot finish until cancelled
    let stalled_cancel = CancellationToken::new();
    let stalled = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = stalled_cancel.clone();
        tokio::spawn(async move {
            let source = SlowStart(MemoryFeedSource::new(FEED, 8));
            orchestrator.run(&source, cancel).await
        })
    };
    while orchestrator.state() != RunState::Running {
        tokio::task::yield_now().await;
    }

    let refused = scheduler.trigger_once(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(refused.error, IngestError::AlreadyRunning));

    stalled_cancel.cancel();
    let aborted = stalled.await.unwrap().unwrap_err();
    assert!(matches!(aborted.error, IngestError::Cancelled));
    assert_eq!(sink.attempts(), 0);
}

/// Never finishes opening the feed.
struct SlowStart(MemoryFeedSource);

#[async_trait::async_trait]
impl jobfeed_ingest::FeedSource for SlowStart {
    async fn open(&self) -> Result<jobfeed_ingest::ByteStream, jobfeed_ingest::TransportError> {
        std::future::pending::<()>().await;
        self.0.open().await
    }

    fn describe(&self) -> String {
        "slow start".to_string()
    }
}

#[tokio::test]
async fn test_completed_run_purges_vanished_jobs() {
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Arc::new(IngestOrchestrator::new(PipelineSettings::default(), sink.clone()));
    let settings = ScheduleSettings {
        retention: Duration::from_millis(300),
        ..ScheduleSettings::default()
    };

    let full = FeedScheduler::new(
        Arc::clone(&orchestrator),
        Arc::new(MemoryFeedSource::new(FEED, 8)),
        settings.clone(),
    );
    let only_a1 = FeedScheduler::new(
        Arc::clone(&orchestrator),
        Arc::new(MemoryFeedSource::new("<jobs><job><guid>A1</guid></job></jobs>", 8)),
        settings,
    );

    full.trigger_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(sink.len().await, 2);

    // Let B2 age past the retention window; A1 is refreshed by the next run
    tokio::time::sleep(Duration::from_millis(600)).await;
    only_a1.trigger_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(sink.identifiers().await, vec!["A1"]);
}

#[tokio::test]
async fn test_purge_expired_reports_count() {
    let sink = Arc::new(MemorySink::new());
    let scheduler = scheduler(sink.clone(), FEED, ScheduleSettings::default());

    scheduler.trigger_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(scheduler.purge_expired().await, 0);
    assert_eq!(sink.purge_expired(Duration::from_secs(3600)).await.unwrap(), 0);
}
