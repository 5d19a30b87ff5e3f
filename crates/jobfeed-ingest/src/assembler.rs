//! Record assembly
//!
//! Folds the tokenizer's event stream into flat records. A record starts at
//! an open tag named after the configured record element and ends at the
//! matching close tag. Every element inside it contributes its trimmed text
//! to a field of the same name; nested elements are flattened by local name,
//! so `<location><city>Berlin</city></location>` yields `city = "Berlin"`.
//!
//! A field that appears twice in one record accumulates: the second
//! occurrence's text is appended to the first.

use jobfeed_common::FieldMap;
use tracing::trace;

use crate::tokenizer::RawEvent;

/// A complete record ready for the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Value of the identifier field; never empty
    pub identifier: String,
    pub fields: FieldMap,
}

/// Outcome of a completed record element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    Record(Record),
    /// The element closed without a usable identifier
    Skipped { fields: FieldMap },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AssemblerState {
    Idle,
    InsideRecord,
    InsideField(String),
}

/// Event-driven record builder.
///
/// # Examples
///
/// ```
/// use jobfeed_ingest::assembler::{Assembled, RecordAssembler};
/// use jobfeed_ingest::tokenizer::RawEvent;
///
/// let mut assembler = RecordAssembler::new("job", "guid");
/// let events = [
///     RawEvent::open("job"),
///     RawEvent::open("guid"),
///     RawEvent::text("A1"),
///     RawEvent::close("guid"),
///     RawEvent::close("job"),
/// ];
///
/// let completed: Vec<Assembled> = events
///     .into_iter()
///     .filter_map(|event| assembler.push(event))
///     .collect();
/// assert!(matches!(&completed[..], [Assembled::Record(r)] if r.identifier == "A1"));
/// ```
#[derive(Debug)]
pub struct RecordAssembler {
    record_element: String,
    id_field: String,
    state: AssemblerState,
    fields: FieldMap,
}

impl RecordAssembler {
    pub fn new(record_element: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            record_element: record_element.into(),
            id_field: id_field.into(),
            state: AssemblerState::Idle,
            fields: FieldMap::new(),
        }
    }

    /// Whether a record element is currently open
    pub fn in_record(&self) -> bool {
        self.state != AssemblerState::Idle
    }

    /// Drop a record left open, returning the fields gathered so far.
    pub fn abandon(&mut self) -> Option<FieldMap> {
        if !self.in_record() {
            return None;
        }
        self.state = AssemblerState::Idle;
        Some(std::mem::take(&mut self.fields))
    }

    /// Apply one event; returns the outcome when a record element closes.
    pub fn push(&mut self, event: RawEvent) -> Option<Assembled> {
        let state = std::mem::replace(&mut self.state, AssemblerState::Idle);

        let (next, completed) = match (state, event) {
            (AssemblerState::Idle, RawEvent::OpenTag { name }) if name == self.record_element => {
                self.fields = FieldMap::new();
                (AssemblerState::InsideRecord, None)
            },
            (AssemblerState::Idle, _) => (AssemblerState::Idle, None),

            (AssemblerState::InsideRecord, RawEvent::OpenTag { name }) => {
                (AssemblerState::InsideField(name), None)
            },
            (AssemblerState::InsideRecord, RawEvent::CloseTag { name })
                if name == self.record_element =>
            {
                (AssemblerState::Idle, Some(self.complete()))
            },
            (AssemblerState::InsideRecord, _) => (AssemblerState::InsideRecord, None),

            (AssemblerState::InsideField(field), RawEvent::Text { content }) => {
                if !content.trim().is_empty() {
                    self.fields.append(&field, &content);
                }
                (AssemblerState::InsideField(field), None)
            },
            (AssemblerState::InsideField(_), RawEvent::OpenTag { name }) => {
                (AssemblerState::InsideField(name), None)
            },
            (AssemblerState::InsideField(field), RawEvent::CloseTag { name }) => {
                if name == field {
                    (AssemblerState::InsideRecord, None)
                } else if name == self.record_element {
                    trace!(field = %field, "Record closed with field still open");
                    (AssemblerState::Idle, Some(self.complete()))
                } else {
                    (AssemblerState::InsideRecord, None)
                }
            },
        };

        self.state = next;
        completed
    }

    fn complete(&mut self) -> Assembled {
        let fields = std::mem::take(&mut self.fields);
        let identifier = fields
            .get(&self.id_field)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        match identifier {
            Some(identifier) => Assembled::Record(Record { identifier, fields }),
            None => Assembled::Skipped { fields },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn assemble(events: Vec<RawEvent>) -> Vec<Assembled> {
        let mut assembler = RecordAssembler::new("job", "guid");
        events
            .into_iter()
            .filter_map(|event| assembler.push(event))
            .collect()
    }

    fn field(name: &str, value: &str) -> Vec<RawEvent> {
        vec![RawEvent::open(name), RawEvent::text(value), RawEvent::close(name)]
    }

    fn job(parts: Vec<Vec<RawEvent>>) -> Vec<RawEvent> {
        let mut events = vec![RawEvent::open("job")];
        events.extend(parts.into_iter().flatten());
        events.push(RawEvent::close("job"));
        events
    }

    fn record(assembled: &Assembled) -> &Record {
        match assembled {
            Assembled::Record(record) => record,
            Assembled::Skipped { .. } => panic!("expected a record, got {assembled:?}"),
        }
    }

    #[test]
    fn test_basic_record() {
        let out = assemble(job(vec![field("guid", "A1"), field("title", "Baker")]));
        assert_eq!(out.len(), 1);
        let r = record(&out[0]);
        assert_eq!(r.identifier, "A1");
        assert_eq!(r.fields.get("title"), Some("Baker"));
    }

    #[test]
    fn test_field_order_preserved() {
        let out = assemble(job(vec![
            field("title", "Baker"),
            field("guid", "A1"),
            field("city", "Berlin"),
        ]));
        let names: Vec<&str> = record(&out[0]).fields.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["title", "guid", "city"]);
    }

    #[test]
    fn test_missing_identifier_is_skipped() {
        let out = assemble(job(vec![field("title", "Baker")]));
        assert!(matches!(&out[0], Assembled::Skipped { fields } if fields.get("title") == Some("Baker")));
    }

    #[test]
    fn test_blank_identifier_is_skipped() {
        let out = assemble(job(vec![field("guid", "   "), field("title", "Baker")]));
        assert!(matches!(out[0], Assembled::Skipped { .. }));
    }

    #[test]
    fn test_split_text_concatenates_trimmed() {
        let out = assemble(job(vec![
            field("guid", "A1"),
            vec![
                RawEvent::open("title"),
                RawEvent::text("  Senior "),
                RawEvent::text(" Baker "),
                RawEvent::close("title"),
            ],
        ]));
        assert_eq!(record(&out[0]).fields.get("title"), Some("SeniorBaker"));
    }

    #[test]
    fn test_repeated_field_accumulates() {
        let out = assemble(job(vec![
            field("guid", "A1"),
            field("tag", "bread"),
            field("tag", "cake"),
        ]));
        assert_eq!(record(&out[0]).fields.get("tag"), Some("breadcake"));
    }

    #[test]
    fn test_nested_elements_flatten_by_local_name() {
        let out = assemble(job(vec![
            field("guid", "A1"),
            vec![
                RawEvent::open("location"),
                RawEvent::text("\n  "),
                RawEvent::open("city"),
                RawEvent::text("Berlin"),
                RawEvent::close("city"),
                RawEvent::text("\n"),
                RawEvent::close("location"),
            ],
        ]));
        let r = record(&out[0]);
        assert_eq!(r.fields.get("city"), Some("Berlin"));
        assert!(!r.fields.contains("location"));
    }

    #[test]
    fn test_events_outside_records_ignored() {
        let mut events = field("generated", "2024-01-01");
        events.extend(job(vec![field("guid", "A1")]));
        events.push(RawEvent::text("trailing"));
        let out = assemble(events);
        assert_eq!(out.len(), 1);
        assert!(!record(&out[0]).fields.contains("generated"));
    }

    #[test]
    fn test_whitespace_inside_record_ignored() {
        let out = assemble(job(vec![
            vec![RawEvent::text("\n    ")],
            field("guid", "A1"),
            vec![RawEvent::text("\n")],
        ]));
        assert_eq!(record(&out[0]).fields.len(), 1);
    }

    #[test]
    fn test_record_closed_while_field_open() {
        let out = assemble(vec![
            RawEvent::open("job"),
            RawEvent::open("guid"),
            RawEvent::text("A1"),
            RawEvent::close("job"),
        ]);
        assert_eq!(record(&out[0]).identifier, "A1");
    }

    #[test]
    fn test_self_closing_field_absent() {
        let out = assemble(job(vec![
            field("guid", "A1"),
            vec![RawEvent::open("remote"), RawEvent::close("remote")],
        ]));
        assert!(!record(&out[0]).fields.contains("remote"));
    }

    #[test]
    fn test_consecutive_records_do_not_leak_fields() {
        let mut events = job(vec![field("guid", "A1"), field("title", "Baker")]);
        events.extend(job(vec![field("guid", "B2")]));
        let out = assemble(events);
        assert_eq!(out.len(), 2);
        assert!(!record(&out[1]).fields.contains("title"));
    }

    #[test]
    fn test_in_record_tracking() {
        let mut assembler = RecordAssembler::new("job", "guid");
        assert!(!assembler.in_record());
        assembler.push(RawEvent::open("job"));
        assert!(assembler.in_record());
        assembler.push(RawEvent::close("job"));
        assert!(!assembler.in_record());
    }

    #[test]
    fn test_abandon_unclosed_record() {
        let mut assembler = RecordAssembler::new("job", "guid");
        assert!(assembler.abandon().is_none());

        for event in [
            RawEvent::open("job"),
            RawEvent::open("guid"),
            RawEvent::text("A1"),
            RawEvent::close("guid"),
            RawEvent::close("x"),
        ] {
            assert!(assembler.push(event).is_none());
        }

        let fields = assembler.abandon().unwrap();
        assert_eq!(fields.get("guid"), Some("A1"));
        assert!(!assembler.in_record());
        assert!(assembler.abandon().is_none());
    }
}
