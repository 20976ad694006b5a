//! The read-only corpus view exposed to programs as `ctx`.
//!
//! Every byte range a program observes through a `DocView` is appended to
//! the step's span log, with the SHA-256 of exactly those bytes, before the
//! decoded text reaches the program. Slicing and searching operate on
//! canonical *bytes*; the UTF-8 text returned to the program is
//! informational only.

use std::cell::RefCell;
use std::rc::Rc;

use aho_corasick::AhoCorasick;
use rlm_corpus::{CanonicalReader, ContextDescriptor, ReaderError};
use rlm_types::{DocumentId, LimitKind, Sha256Hex, SpanEntry, SpanLog, SpanLogError};

use crate::control::Unwind;

fn append_span(
    log: &RefCell<SpanLog>,
    doc: &DocumentId,
    bytes: &[u8],
    start: u64,
    end: u64,
) -> Result<(), Unwind> {
    let payload = &bytes[start as usize..end as usize];
    let entry = SpanEntry::new(doc.clone(), start, end, Sha256Hex::of(payload))
        .map_err(|e| Unwind::Internal(format!("span entry: {e}")))?;
    match log.borrow_mut().append(entry) {
        Ok(()) => Ok(()),
        Err(SpanLogError::CapExceeded { .. }) => Err(Unwind::Limit(LimitKind::SpanCount)),
        Err(SpanLogError::Sealed) => Err(Unwind::Internal("span log sealed mid-step".to_string())),
    }
}

/// One document as the program sees it.
pub struct DocView {
    id: DocumentId,
    bytes: Rc<[u8]>,
    log: Rc<RefCell<SpanLog>>,
}

impl std::fmt::Debug for DocView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocView")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl DocView {
    #[must_use]
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    #[must_use]
    pub fn length(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Decode `[start, end)` as UTF-8 text, logging the observation.
    ///
    /// A slice straddling a multi-byte code point is allowed; the returned
    /// text uses replacement characters, the logged range is the byte range.
    pub fn slice(&self, start: i64, end: i64) -> Result<String, Unwind> {
        let len = self.bytes.len() as i64;
        if start < 0 || end < start || end > len {
            return Err(Unwind::exc(
                "RangeError",
                format!("slice [{start}, {end}) out of range for {} (len {len})", self.id),
            ));
        }
        let (start, end) = (start as u64, end as u64);
        append_span(&self.log, &self.id, &self.bytes, start, end)?;
        let payload = &self.bytes[start as usize..end as usize];
        Ok(String::from_utf8_lossy(payload).into_owned())
    }

    /// Find `needle` (as UTF-8 bytes) at or after byte offset `start`.
    ///
    /// Returns the byte offset of the first hit, or -1. Hits log the matched
    /// range; misses log nothing. An empty needle is rejected before any
    /// span is recorded: a zero-width "hit" would count as an observation
    /// without revealing a single byte.
    pub fn find(&self, needle: &str, start: i64) -> Result<i64, Unwind> {
        if needle.is_empty() {
            return Err(Unwind::value_error("find() needle must not be empty"));
        }
        let len = self.bytes.len() as i64;
        let from = start.clamp(0, len) as usize;
        if start > len {
            return Ok(-1);
        }
        let searcher = AhoCorasick::new([needle.as_bytes()])
            .map_err(|e| Unwind::Internal(format!("search automaton: {e}")))?;
        match searcher.find(&self.bytes[from..]) {
            Some(found) => {
                let hit = (from + found.start()) as u64;
                let end = hit + needle.len() as u64;
                append_span(&self.log, &self.id, &self.bytes, hit, end)?;
                Ok(hit as i64)
            }
            None => Ok(-1),
        }
    }

    /// Lazy line iteration over `[start, end)`, splitting on `\n`.
    ///
    /// Each yielded line logs its own span covering the line's bytes,
    /// exclusive of the newline itself.
    pub fn iter_lines(&self, start: i64, end: Option<i64>) -> Result<LineIter, Unwind> {
        let len = self.bytes.len() as i64;
        let end = end.unwrap_or(len);
        if start < 0 || end < start || end > len {
            return Err(Unwind::exc(
                "RangeError",
                format!("iter_lines [{start}, {end}) out of range for {} (len {len})", self.id),
            ));
        }
        Ok(LineIter {
            id: self.id.clone(),
            bytes: Rc::clone(&self.bytes),
            log: Rc::clone(&self.log),
            at: start as usize,
            end: end as usize,
        })
    }
}

/// Iterator state for `DocView.iter_lines`. Lines are produced, and logged,
/// one at a time as the program consumes them.
pub struct LineIter {
    id: DocumentId,
    bytes: Rc<[u8]>,
    log: Rc<RefCell<SpanLog>>,
    at: usize,
    end: usize,
}

impl std::fmt::Debug for LineIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LineIter({}, at {})", self.id, self.at)
    }
}

impl LineIter {
    /// Next `(line_start, line_text)` pair, or `None` at the end.
    pub fn next_line(&mut self) -> Result<Option<(u64, String)>, Unwind> {
        if self.at >= self.end {
            return Ok(None);
        }
        let window = &self.bytes[self.at..self.end];
        let line_len = window
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(window.len());
        let line_start = self.at as u64;
        let line_end = (self.at + line_len) as u64;
        append_span(&self.log, &self.id, &self.bytes, line_start, line_end)?;
        let text = String::from_utf8_lossy(&window[..line_len]).into_owned();
        // Skip past the newline; a trailing newline yields no empty line.
        self.at += line_len + 1;
        Ok(Some((line_start, text)))
    }
}

/// The `ctx` capability: the ordered document set of one step.
pub struct ContextView {
    docs: Vec<Rc<DocView>>,
}

impl std::fmt::Debug for ContextView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContextView({} docs)", self.docs.len())
    }
}

impl ContextView {
    /// Materialize the view for a descriptor. Documents are read through the
    /// canonical reader once, in descriptor order.
    pub fn new<R: CanonicalReader + ?Sized>(
        descriptor: &ContextDescriptor,
        reader: &R,
        log: Rc<RefCell<SpanLog>>,
    ) -> Result<Self, ReaderError> {
        let mut docs = Vec::with_capacity(descriptor.len());
        for id in descriptor.docs() {
            let len = reader.length(id)?;
            let bytes: Rc<[u8]> = reader.read(id, 0, len)?.into();
            docs.push(Rc::new(DocView {
                id: id.clone(),
                bytes,
                log: Rc::clone(&log),
            }));
        }
        Ok(Self { docs })
    }

    /// Documents in descriptor order.
    #[must_use]
    pub fn docs(&self) -> &[Rc<DocView>] {
        &self.docs
    }
}
