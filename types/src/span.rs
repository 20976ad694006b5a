//! Span records: what a program observed, and what a citation asserts.
//!
//! A span is a half-open byte range `[start, end)` into one document's
//! canonical text. The span log is the ordered record of every range a step
//! revealed to the program; a `SpanRef` is a persisted citation whose
//! checksum is recomputable from stored artifacts alone.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::Sha256Hex;
use crate::ids::DocumentId;

#[derive(Debug, Error)]
pub enum SpanEntryError {
    #[error("span start {start} exceeds end {end}")]
    Inverted { start: u64, end: u64 },
}

/// One observed byte range, recorded at the moment the program saw it.
///
/// `sha256` is the digest of exactly the bytes in `[start, end)` of the
/// document's canonical text, computed by the capability that revealed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEntry {
    #[serde(rename = "doc_id")]
    pub doc: DocumentId,
    pub start: u64,
    pub end: u64,
    pub sha256: Sha256Hex,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl SpanEntry {
    pub fn new(
        doc: DocumentId,
        start: u64,
        end: u64,
        sha256: Sha256Hex,
    ) -> Result<Self, SpanEntryError> {
        if start > end {
            return Err(SpanEntryError::Inverted { start, end });
        }
        Ok(Self {
            doc,
            start,
            end,
            sha256,
            label: None,
        })
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether `[start, end)` of `doc` lies entirely inside this entry.
    #[must_use]
    pub fn covers(&self, doc: &DocumentId, start: u64, end: u64) -> bool {
        &self.doc == doc && self.start <= start && end <= self.end
    }
}

#[derive(Debug, Error)]
pub enum SpanLogError {
    #[error("span log is sealed")]
    Sealed,
    #[error("span log cap of {cap} entries exceeded")]
    CapExceeded { cap: usize },
}

/// Append-only record of the byte ranges one step observed.
///
/// Entries appear in observation order and are never coalesced; overlap
/// handling is a citation-engine concern. The log is mutable only until
/// [`SpanLog::seal`], after which appends fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanLog {
    entries: Vec<SpanEntry>,
    cap: usize,
    sealed: bool,
}

impl SpanLog {
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap,
            sealed: false,
        }
    }

    pub fn append(&mut self, entry: SpanEntry) -> Result<(), SpanLogError> {
        if self.sealed {
            return Err(SpanLogError::Sealed);
        }
        if self.entries.len() >= self.cap {
            return Err(SpanLogError::CapExceeded { cap: self.cap });
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SpanEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn entries(&self) -> &[SpanEntry] {
        &self.entries
    }

    /// Consume the sealed log into its entries for persistence.
    #[must_use]
    pub fn into_entries(self) -> Vec<SpanEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a SpanLog {
    type Item = &'a SpanEntry;
    type IntoIter = std::slice::Iter<'a, SpanEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A citation as the program states it: document and range, no checksum.
///
/// Programs cannot be trusted to hash; the citation engine recomputes
/// everything from the canonical reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRefCandidate {
    pub doc: DocumentId,
    pub start: u64,
    pub end: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A persisted, verifiable citation.
///
/// `sha256` is recomputable from the canonical text of `doc` alone; `preview`
/// is informational and never trusted by verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRef {
    #[serde(rename = "doc_id")]
    pub doc: DocumentId,
    pub start: u64,
    pub end: u64,
    pub sha256: Sha256Hex,
    pub preview: String,
}

impl SpanRef {
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::{SpanEntry, SpanEntryError, SpanLog, SpanLogError};
    use crate::hash::Sha256Hex;
    use crate::ids::DocumentId;

    fn entry(doc: &str, start: u64, end: u64) -> SpanEntry {
        SpanEntry::new(DocumentId::from(doc), start, end, Sha256Hex::of(b"payload"))
            .expect("valid range")
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = SpanEntry::new(DocumentId::from("d"), 5, 2, Sha256Hex::of(b""))
            .expect_err("inverted");
        assert!(matches!(err, SpanEntryError::Inverted { start: 5, end: 2 }));
    }

    #[test]
    fn covers_requires_same_document_and_containment() {
        let e = entry("doc-0", 10, 50);
        assert!(e.covers(&DocumentId::from("doc-0"), 10, 50));
        assert!(e.covers(&DocumentId::from("doc-0"), 20, 30));
        assert!(!e.covers(&DocumentId::from("doc-0"), 5, 30));
        assert!(!e.covers(&DocumentId::from("doc-0"), 20, 51));
        assert!(!e.covers(&DocumentId::from("doc-1"), 20, 30));
    }

    #[test]
    fn log_preserves_order_and_duplicates() {
        let mut log = SpanLog::with_cap(8);
        log.append(entry("d", 0, 4)).expect("append");
        log.append(entry("d", 0, 4)).expect("duplicate append");
        log.append(entry("d", 4, 8)).expect("append");
        let ranges: Vec<(u64, u64)> = log.iter().map(|e| (e.start, e.end)).collect();
        assert_eq!(ranges, vec![(0, 4), (0, 4), (4, 8)]);
    }

    #[test]
    fn sealed_log_rejects_appends() {
        let mut log = SpanLog::with_cap(8);
        log.append(entry("d", 0, 1)).expect("append");
        log.seal();
        assert!(matches!(
            log.append(entry("d", 1, 2)),
            Err(SpanLogError::Sealed)
        ));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn cap_overrun_is_distinguishable() {
        let mut log = SpanLog::with_cap(1);
        log.append(entry("d", 0, 1)).expect("append");
        assert!(matches!(
            log.append(entry("d", 1, 2)),
            Err(SpanLogError::CapExceeded { cap: 1 })
        ));
    }
}
