//! Run statistics
//!
//! A [`RunSummary`] is produced by every run, including aborted ones. Once all
//! in-flight writes have settled, `records_seen` always equals
//! `records_upserted + records_skipped + records_failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sink::Written;

/// Lifecycle of a single orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    NotStarted,
    Running,
    Completed,
    Aborted,
}

impl RunState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            RunState::NotStarted => 0,
            RunState::Running => 1,
            RunState::Completed => 2,
            RunState::Aborted => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Completed,
            3 => RunState::Aborted,
            _ => RunState::NotStarted,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::NotStarted => "not_started",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Counters collected during one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// State the run ended in
    pub state: RunState,
    /// Complete record elements encountered
    pub records_seen: u64,
    /// Records the sink accepted
    pub records_upserted: u64,
    /// Records dropped for lacking a usable identifier
    pub records_skipped: u64,
    /// Records the sink rejected
    pub records_failed: u64,
    /// Upserts that created a new document
    pub records_created: u64,
    /// Upserts that replaced a document with different content
    pub records_replaced: u64,
    /// Upserts that re-delivered identical content
    pub records_unchanged: u64,
    /// Raw bytes received from the source
    pub bytes_received: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl RunSummary {
    /// Fresh summary for a run that is starting now
    pub fn start() -> Self {
        Self {
            state: RunState::Running,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Stamp the end time and final state.
    pub fn finish(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.finished_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn record_seen(&mut self) {
        self.records_seen += 1;
    }

    pub fn record_skipped(&mut self) {
        self.records_skipped += 1;
    }

    pub fn record_failed(&mut self) {
        self.records_failed += 1;
    }

    pub fn record_written(&mut self, written: Written) {
        self.records_upserted += 1;
        match written {
            Written::Created => self.records_created += 1,
            Written::Replaced => self.records_replaced += 1,
            Written::Unchanged => self.records_unchanged += 1,
        }
    }

    pub fn add_bytes(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }

    /// Every seen record has exactly one outcome.
    pub fn is_balanced(&self) -> bool {
        self.records_seen == self.records_upserted + self.records_skipped + self.records_failed
    }

    /// Records processed per second of wall time
    pub fn records_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.records_seen as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    /// Share of seen records that were persisted, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.records_seen > 0 {
            (self.records_upserted as f64 / self.records_seen as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_start_marks_running() {
        let summary = RunSummary::start();
        assert_eq!(summary.state, RunState::Running);
        assert!(summary.started_at.is_some());
        assert!(summary.finished_at.is_none());
    }

    #[test]
    fn test_counters_stay_balanced() {
        let mut summary = RunSummary::start();
        for written in [Written::Created, Written::Replaced, Written::Unchanged] {
            summary.record_seen();
            summary.record_written(written);
        }
        summary.record_seen();
        summary.record_skipped();
        summary.record_seen();
        summary.record_failed();

        assert!(summary.is_balanced());
        assert_eq!(summary.records_upserted, 3);
        assert_eq!(summary.records_created, 1);
        assert_eq!(summary.records_replaced, 1);
        assert_eq!(summary.records_unchanged, 1);
    }

    #[test]
    fn test_in_flight_write_unbalances() {
        let mut summary = RunSummary::start();
        summary.record_seen();
        assert!(!summary.is_balanced());
    }

    #[test]
    fn test_finish_sets_duration() {
        let mut summary = RunSummary::start();
        summary.finish(RunState::Completed);
        assert_eq!(summary.state, RunState::Completed);
        assert!(summary.finished_at.is_some());
        assert!(summary.duration_secs >= 0.0);
    }

    #[test]
    fn test_success_rate() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.success_rate(), 0.0);

        summary.records_seen = 4;
        summary.records_upserted = 3;
        summary.records_failed = 1;
        assert_eq!(summary.success_rate(), 75.0);
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            RunState::NotStarted,
            RunState::Running,
            RunState::Completed,
            RunState::Aborted,
        ] {
            assert_eq!(RunState::from_u8(state.as_u8()), state);
        }
        assert!(RunState::Aborted.is_terminal());
        assert!(!RunState::Running.is_terminal());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&RunState::NotStarted).unwrap();
        assert_eq!(json, "\"not_started\"");
    }
}
