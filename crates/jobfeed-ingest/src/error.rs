//! Ingestion error taxonomy
//!
//! Fatal errors ([`TransportError`], [`MalformedXmlError`]) end a run and are
//! returned to the caller inside [`RunAborted`] together with the partial
//! [`RunSummary`]. Per-record errors ([`SinkError`]) are counted and logged by
//! the orchestrator and never leave it.

use thiserror::Error;

use crate::summary::RunSummary;

/// The feed could not be delivered completely.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Feed {url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream interrupted: {0}")]
    Interrupted(String),
}

/// Why the tokenizer gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    UnterminatedTag,
    UnterminatedCdata,
    UnterminatedComment,
    UnterminatedDeclaration,
    UnterminatedInstruction,
    EmptyTagName,
    TokenTooLong { limit: usize },
    UnclosedElements { depth: usize },
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedReason::UnterminatedTag => f.write_str("unterminated tag"),
            MalformedReason::UnterminatedCdata => f.write_str("unterminated CDATA section"),
            MalformedReason::UnterminatedComment => f.write_str("unterminated comment"),
            MalformedReason::UnterminatedDeclaration => f.write_str("unterminated declaration"),
            MalformedReason::UnterminatedInstruction => {
                f.write_str("unterminated processing instruction")
            },
            MalformedReason::EmptyTagName => f.write_str("empty tag name"),
            MalformedReason::TokenTooLong { limit } => {
                write!(f, "token longer than {limit} bytes")
            },
            MalformedReason::UnclosedElements { depth } => {
                write!(f, "document ended with {depth} unclosed element(s)")
            },
        }
    }
}

/// The byte stream is not well-formed enough to continue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Malformed XML at byte {offset}: {reason}")]
pub struct MalformedXmlError {
    /// Absolute offset of the construct that could not be completed
    pub offset: u64,
    pub reason: MalformedReason,
}

/// Cause of a failed write.
#[derive(Error, Debug)]
pub enum SinkErrorKind {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One record could not be persisted.
#[derive(Error, Debug)]
#[error("Failed to persist record {identifier}: {kind}")]
pub struct SinkError {
    pub identifier: String,
    #[source]
    pub kind: SinkErrorKind,
}

impl SinkError {
    pub fn new(identifier: impl Into<String>, kind: impl Into<SinkErrorKind>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: kind.into(),
        }
    }

    pub fn validation(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(identifier, SinkErrorKind::Validation(message.into()))
    }
}

/// Terminal cause of an aborted run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    MalformedXml(#[from] MalformedXmlError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("A run is already in progress on this orchestrator")]
    AlreadyRunning,
}

/// A run that ended early, with everything it did before stopping.
#[derive(Error, Debug)]
#[error("Ingestion run aborted after {} record(s): {error}", .summary.records_seen)]
pub struct RunAborted {
    pub summary: RunSummary,
    #[source]
    pub error: IngestError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display_carries_offset() {
        let err = MalformedXmlError {
            offset: 42,
            reason: MalformedReason::UnterminatedCdata,
        };
        assert_eq!(err.to_string(), "Malformed XML at byte 42: unterminated CDATA section");
    }

    #[test]
    fn test_sink_error_display_names_identifier() {
        let err = SinkError::validation("A1", "missing field 'title'");
        assert_eq!(
            err.to_string(),
            "Failed to persist record A1: validation failed: missing field 'title'"
        );
    }

    #[test]
    fn test_ingest_error_from_malformed() {
        let err: IngestError = MalformedXmlError {
            offset: 7,
            reason: MalformedReason::EmptyTagName,
        }
        .into();
        assert!(matches!(err, IngestError::MalformedXml(e) if e.offset == 7));
    }
}
