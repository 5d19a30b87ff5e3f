//! Incremental XML tokenizer
//!
//! A push-style state machine that turns arbitrary byte chunks into a flat
//! sequence of [`RawEvent`]s. Chunks may split the input anywhere (inside a
//! tag name, an attribute value, an entity reference or a multi-byte UTF-8
//! sequence); the event sequence is identical to tokenizing the whole document
//! at once.
//!
//! Only the subset of XML needed for record extraction is surfaced:
//!
//! - element names are reduced to their local part (`ns:job` becomes `job`)
//! - attributes are skipped, including quoted values containing `>`
//! - comments, processing instructions and declarations (with an internal
//!   DOCTYPE subset) produce no events and do not split character data
//! - CDATA content is merged into the surrounding character data verbatim
//! - entity references in character data are decoded; undecodable ones are
//!   kept as written
//!
//! Memory is bounded by the longest single token (tag or character-data run),
//! which is capped by `max_token_bytes`.

use std::mem;
use std::vec::Drain;

use quick_xml::escape::resolve_predefined_entity;
use tracing::trace;

use crate::error::{MalformedReason, MalformedXmlError};

/// Default cap on a single tag or character-data run (8 MiB)
pub const DEFAULT_MAX_TOKEN_BYTES: usize = 8 * 1024 * 1024;

const CDATA_OPEN: &[u8] = b"[CDATA[";

/// Structural event produced by the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    OpenTag { name: String },
    Text { content: String },
    CloseTag { name: String },
}

impl RawEvent {
    pub fn open(name: impl Into<String>) -> Self {
        RawEvent::OpenTag { name: name.into() }
    }

    pub fn text(content: impl Into<String>) -> Self {
        RawEvent::Text {
            content: content.into(),
        }
    }

    pub fn close(name: impl Into<String>) -> Self {
        RawEvent::CloseTag { name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    /// Character data
    Text,
    /// Just consumed `<`
    Markup,
    OpenTag { quote: Option<u8> },
    CloseTag,
    /// Just consumed `<!`; not yet known whether comment, CDATA or declaration
    Bang,
    Cdata,
    Comment { tail: [u8; 2] },
    Declaration { depth: usize, quote: Option<u8> },
    Instruction { prev: u8 },
}

/// Push tokenizer over a chunked byte stream.
///
/// # Examples
///
/// ```
/// use jobfeed_ingest::tokenizer::{RawEvent, XmlTokenizer};
///
/// let mut tokenizer = XmlTokenizer::new();
/// let mut events: Vec<RawEvent> = Vec::new();
/// events.extend(tokenizer.feed(b"<job><ti").unwrap());
/// events.extend(tokenizer.feed(b"tle>Baker</title></job>").unwrap());
/// events.extend(tokenizer.finish().unwrap());
///
/// assert_eq!(events[2], RawEvent::text("Baker"));
/// ```
#[derive(Debug)]
pub struct XmlTokenizer {
    state: Lex,
    /// Character data not yet entity-decoded
    raw_text: Vec<u8>,
    /// Decoded character data of the current run
    text: String,
    text_start: u64,
    /// Tag or CDATA bytes of the construct in progress
    token: Vec<u8>,
    token_start: u64,
    /// Absolute offset of the next chunk
    offset: u64,
    depth: usize,
    max_token_bytes: usize,
    events: Vec<RawEvent>,
    failed: Option<MalformedXmlError>,
}

impl Default for XmlTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlTokenizer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_TOKEN_BYTES)
    }

    pub fn with_limit(max_token_bytes: usize) -> Self {
        Self {
            state: Lex::Text,
            raw_text: Vec::new(),
            text: String::new(),
            text_start: 0,
            token: Vec::new(),
            token_start: 0,
            offset: 0,
            depth: 0,
            max_token_bytes,
            events: Vec::new(),
            failed: None,
        }
    }

    /// Number of currently open elements
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Total bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Consume the next chunk and return the events it completed.
    ///
    /// If the chunk turns malformed after some events were already completed,
    /// those events are still returned and the error is held: [`error`]
    /// reports it at once and every further call fails with it.
    ///
    /// [`error`]: XmlTokenizer::error
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Drain<'_, RawEvent>, MalformedXmlError> {
        if let Some(err) = self.failed {
            return Err(err);
        }
        self.events.clear();

        if let Err(err) = self.consume(chunk) {
            self.failed = Some(err);
            if self.events.is_empty() {
                return Err(err);
            }
        }
        Ok(self.events.drain(..))
    }

    /// The error that stopped tokenizing, if any
    pub fn error(&self) -> Option<MalformedXmlError> {
        self.failed
    }

    /// Signal end of input and flush trailing character data.
    ///
    /// Fails if the input stopped inside a construct or with elements still
    /// open.
    pub fn finish(&mut self) -> Result<Drain<'_, RawEvent>, MalformedXmlError> {
        if let Some(err) = self.failed {
            return Err(err);
        }
        self.events.clear();

        if let Err(err) = self.complete() {
            self.failed = Some(err);
            return Err(err);
        }
        Ok(self.events.drain(..))
    }

    fn consume(&mut self, chunk: &[u8]) -> Result<(), MalformedXmlError> {
        let base = self.offset;
        let mut i = 0;

        while i < chunk.len() {
            let at = base + i as u64;

            if self.state == Lex::Text {
                // Fast path: take the whole run of character data at once
                let rest = &chunk[i..];
                match rest.iter().position(|&b| b == b'<') {
                    Some(pos) => {
                        self.push_raw_text(&rest[..pos], at)?;
                        self.begin_markup(at + pos as u64);
                        i += pos + 1;
                    },
                    None => {
                        self.push_raw_text(rest, at)?;
                        i = chunk.len();
                    },
                }
                continue;
            }

            self.step(chunk[i], at)?;
            i += 1;
        }

        self.offset = base + chunk.len() as u64;
        Ok(())
    }

    fn step(&mut self, b: u8, at: u64) -> Result<(), MalformedXmlError> {
        match self.state {
            Lex::Text => {
                if b == b'<' {
                    self.begin_markup(at);
                } else {
                    self.push_raw_text(&[b], at)?;
                }
            },
            Lex::Markup => match b {
                b'/' => self.state = Lex::CloseTag,
                b'!' => self.state = Lex::Bang,
                b'?' => self.state = Lex::Instruction { prev: 0 },
                _ => {
                    self.state = Lex::OpenTag { quote: None };
                    self.step_open_tag(b, None)?;
                },
            },
            Lex::OpenTag { quote } => self.step_open_tag(b, quote)?,
            Lex::CloseTag => {
                if b == b'>' {
                    self.close_tag()?;
                } else {
                    self.push_token(b)?;
                }
            },
            Lex::Bang => self.step_bang(b)?,
            Lex::Cdata => {
                self.push_token(b)?;
                if self.token.ends_with(b"]]>") {
                    self.end_cdata()?;
                }
            },
            Lex::Comment { tail } => {
                self.state = if b == b'>' && tail == [b'-', b'-'] {
                    Lex::Text
                } else {
                    Lex::Comment {
                        tail: [tail[1], b],
                    }
                };
            },
            Lex::Instruction { prev } => {
                self.state = if b == b'>' && prev == b'?' {
                    Lex::Text
                } else {
                    Lex::Instruction { prev: b }
                };
            },
            Lex::Declaration { depth, quote } => {
                self.state = declaration_step(depth, quote, b);
            },
        }
        Ok(())
    }

    fn begin_markup(&mut self, at: u64) {
        self.token.clear();
        self.token_start = at;
        self.state = Lex::Markup;
    }

    fn step_open_tag(&mut self, b: u8, quote: Option<u8>) -> Result<(), MalformedXmlError> {
        match quote {
            Some(q) => {
                self.push_token(b)?;
                if b == q {
                    self.state = Lex::OpenTag { quote: None };
                }
            },
            None => match b {
                b'>' => self.open_tag()?,
                b'"' | b'\'' => {
                    self.push_token(b)?;
                    self.state = Lex::OpenTag { quote: Some(b) };
                },
                _ => self.push_token(b)?,
            },
        }
        Ok(())
    }

    fn step_bang(&mut self, b: u8) -> Result<(), MalformedXmlError> {
        self.push_token(b)?;

        if &self.token[..] == b"--" {
            self.token.clear();
            self.state = Lex::Comment { tail: [0, 0] };
        } else if &self.token[..] == CDATA_OPEN {
            self.token.clear();
            self.state = Lex::Cdata;
        } else if &self.token[..] == b"-" || CDATA_OPEN.starts_with(&self.token) {
            // undecided
        } else {
            // Anything else is a declaration; replay what was buffered
            let pending = mem::take(&mut self.token);
            let mut state = Lex::Declaration {
                depth: 0,
                quote: None,
            };
            for byte in pending {
                if let Lex::Declaration { depth, quote } = state {
                    state = declaration_step(depth, quote, byte);
                }
            }
            self.state = state;
        }
        Ok(())
    }

    fn open_tag(&mut self) -> Result<(), MalformedXmlError> {
        let self_closing = self.token.last() == Some(&b'/');
        let name = element_name(&self.token);
        if name.is_empty() {
            return Err(self.malformed(self.token_start, MalformedReason::EmptyTagName));
        }

        self.flush_text();
        if self_closing {
            self.events.push(RawEvent::open(name.clone()));
            self.events.push(RawEvent::close(name));
        } else {
            self.events.push(RawEvent::open(name));
            self.depth += 1;
        }

        self.token.clear();
        self.state = Lex::Text;
        Ok(())
    }

    fn close_tag(&mut self) -> Result<(), MalformedXmlError> {
        let name = element_name(self.token.trim_ascii());
        if name.is_empty() {
            return Err(self.malformed(self.token_start, MalformedReason::EmptyTagName));
        }

        self.flush_text();
        self.events.push(RawEvent::close(name));
        self.depth = self.depth.saturating_sub(1);

        self.token.clear();
        self.state = Lex::Text;
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<(), MalformedXmlError> {
        let content_len = self.token.len() - b"]]>".len();

        self.decode_raw_text();
        if self.text.is_empty() {
            self.text_start = self.token_start;
        }
        self.text
            .push_str(&String::from_utf8_lossy(&self.token[..content_len]));

        self.token.clear();
        self.state = Lex::Text;

        if self.text.len() > self.max_token_bytes {
            return Err(self.too_long(self.text_start));
        }
        Ok(())
    }

    fn push_token(&mut self, b: u8) -> Result<(), MalformedXmlError> {
        self.token.push(b);
        if self.token.len() > self.max_token_bytes {
            return Err(self.too_long(self.token_start));
        }
        Ok(())
    }

    fn push_raw_text(&mut self, bytes: &[u8], at: u64) -> Result<(), MalformedXmlError> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.raw_text.is_empty() && self.text.is_empty() {
            self.text_start = at;
        }

        self.raw_text.extend_from_slice(bytes);
        if self.raw_text.len() + self.text.len() > self.max_token_bytes {
            return Err(self.too_long(self.text_start));
        }
        Ok(())
    }

    /// Move buffered raw bytes into the decoded run.
    fn decode_raw_text(&mut self) {
        if self.raw_text.is_empty() {
            return;
        }

        let raw = String::from_utf8_lossy(&self.raw_text);
        decode_references(&raw, &mut self.text);
        self.raw_text.clear();
    }

    fn flush_text(&mut self) {
        self.decode_raw_text();
        if !self.text.is_empty() {
            self.events.push(RawEvent::Text {
                content: mem::take(&mut self.text),
            });
        }
    }

    fn complete(&mut self) -> Result<(), MalformedXmlError> {
        let unterminated = match self.state {
            Lex::Text => None,
            Lex::Markup | Lex::OpenTag { .. } | Lex::CloseTag => {
                Some(MalformedReason::UnterminatedTag)
            },
            Lex::Bang | Lex::Declaration { .. } => Some(MalformedReason::UnterminatedDeclaration),
            Lex::Cdata => Some(MalformedReason::UnterminatedCdata),
            Lex::Comment { .. } => Some(MalformedReason::UnterminatedComment),
            Lex::Instruction { .. } => Some(MalformedReason::UnterminatedInstruction),
        };
        if let Some(reason) = unterminated {
            return Err(self.malformed(self.token_start, reason));
        }

        if self.depth > 0 {
            return Err(self.malformed(
                self.offset,
                MalformedReason::UnclosedElements { depth: self.depth },
            ));
        }

        self.flush_text();
        Ok(())
    }

    fn malformed(&self, offset: u64, reason: MalformedReason) -> MalformedXmlError {
        MalformedXmlError { offset, reason }
    }

    fn too_long(&self, offset: u64) -> MalformedXmlError {
        self.malformed(
            offset,
            MalformedReason::TokenTooLong {
                limit: self.max_token_bytes,
            },
        )
    }
}

fn declaration_step(depth: usize, quote: Option<u8>, b: u8) -> Lex {
    let (depth, quote) = match (quote, b) {
        (Some(q), _) if b == q => (depth, None),
        (Some(q), _) => (depth, Some(q)),
        (None, b'"' | b'\'') => (depth, Some(b)),
        (None, b'[') => (depth + 1, None),
        (None, b']') => (depth.saturating_sub(1), None),
        (None, b'>') if depth == 0 => return Lex::Text,
        (None, _) => (depth, None),
    };
    Lex::Declaration { depth, quote }
}

/// Longest reference name looked at after `&`
const MAX_REFERENCE_LEN: usize = 32;

/// Append `raw` to `out`, resolving entity and character references one at a
/// time. A reference that cannot be resolved is copied as written.
fn decode_references(raw: &str, out: &mut String) {
    let mut rest = raw;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let end = rest[1..]
            .bytes()
            .take(MAX_REFERENCE_LEN)
            .position(|b| b == b';');
        let resolved = match end {
            Some(end) => push_reference(&rest[1..1 + end], out).then_some(end + 2),
            None => None,
        };

        match resolved {
            Some(consumed) => rest = &rest[consumed..],
            None => {
                trace!("Keeping unresolved reference verbatim");
                out.push('&');
                rest = &rest[1..];
            },
        }
    }
    out.push_str(rest);
}

/// Resolve one reference name (without `&` and `;`) into `out`.
fn push_reference(name: &str, out: &mut String) -> bool {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix('x') {
            Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
                u32::from_str_radix(hex, 16).ok()
            },
            Some(_) => None,
            None if !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()) => {
                number.parse::<u32>().ok()
            },
            None => None,
        };
        return match code.and_then(char::from_u32) {
            Some(c) => {
                out.push(c);
                true
            },
            None => false,
        };
    }

    match resolve_predefined_entity(name) {
        Some(value) => {
            out.push_str(value);
            true
        },
        None => false,
    }
}

/// Local part of the element name at the start of a tag body.
fn element_name(tag: &[u8]) -> String {
    let end = tag
        .iter()
        .position(|b| b.is_ascii_whitespace() || *b == b'/')
        .unwrap_or(tag.len());
    let qualified = &tag[..end];
    let local = match qualified.iter().rposition(|&b| b == b':') {
        Some(colon) => &qualified[colon + 1..],
        None => qualified,
    };
    String::from_utf8_lossy(local).into_owned()
}
