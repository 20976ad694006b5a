//! Range reads over canonical document bytes.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use rlm_types::DocumentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("document not found: {doc}")]
    NotFound { doc: DocumentId },
    #[error("range [{start}, {end}) out of bounds for {doc} (len {len})")]
    OutOfRange {
        doc: DocumentId,
        start: u64,
        end: u64,
        len: u64,
    },
    /// IO-level failure. Unlike the other variants this one is retryable by
    /// the caller; the bytes on disk did not change, the read did not finish.
    #[error("transport failure reading {doc}: {source}")]
    Transport {
        doc: DocumentId,
        #[source]
        source: io::Error,
    },
}

/// Read-only access to canonical text.
///
/// `read(doc, start, end)` is a pure function of its arguments: the result is
/// exactly `end - start` bytes of the document's canonical text, every time,
/// on every platform. Implementations may cache but must never synthesize,
/// truncate, or re-encode bytes.
pub trait CanonicalReader: Send + Sync {
    fn read(&self, doc: &DocumentId, start: u64, end: u64) -> Result<Vec<u8>, ReaderError>;

    fn length(&self, doc: &DocumentId) -> Result<u64, ReaderError>;

    fn exists(&self, doc: &DocumentId) -> bool;
}

fn check_range(doc: &DocumentId, bytes: &[u8], start: u64, end: u64) -> Result<(), ReaderError> {
    let len = bytes.len() as u64;
    if start > end || end > len {
        return Err(ReaderError::OutOfRange {
            doc: doc.clone(),
            start,
            end,
            len,
        });
    }
    Ok(())
}

/// Corpus held entirely in memory, in insertion order.
///
/// The workhorse for tests and small sessions; also the reference
/// implementation for the reader contract.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    docs: HashMap<DocumentId, Vec<u8>>,
    order: Vec<DocumentId>,
}

impl InMemoryCorpus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document. Later inserts under the same id are ignored;
    /// canonical text is written once.
    pub fn insert(&mut self, doc: DocumentId, text: impl Into<Vec<u8>>) {
        if self.docs.contains_key(&doc) {
            return;
        }
        self.docs.insert(doc.clone(), text.into());
        self.order.push(doc);
    }

    /// Document ids in insertion order.
    #[must_use]
    pub fn doc_ids(&self) -> &[DocumentId] {
        &self.order
    }
}

impl CanonicalReader for InMemoryCorpus {
    fn read(&self, doc: &DocumentId, start: u64, end: u64) -> Result<Vec<u8>, ReaderError> {
        let bytes = self.docs.get(doc).ok_or_else(|| ReaderError::NotFound {
            doc: doc.clone(),
        })?;
        check_range(doc, bytes, start, end)?;
        Ok(bytes[start as usize..end as usize].to_vec())
    }

    fn length(&self, doc: &DocumentId) -> Result<u64, ReaderError> {
        self.docs
            .get(doc)
            .map(|b| b.len() as u64)
            .ok_or_else(|| ReaderError::NotFound { doc: doc.clone() })
    }

    fn exists(&self, doc: &DocumentId) -> bool {
        self.docs.contains_key(doc)
    }
}

/// Corpus backed by one file per document under a root directory.
///
/// The document id is the file name. Whole documents are cached on first
/// touch behind an `RwLock`; the cache is shared read-only across concurrent
/// steps. Files are assumed immutable for the life of the corpus, matching
/// the write-once lifecycle of canonical text.
#[derive(Debug)]
pub struct DirCorpus {
    root: PathBuf,
    cache: RwLock<HashMap<DocumentId, Vec<u8>>>,
}

impl DirCorpus {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, doc: &DocumentId) -> PathBuf {
        self.root.join(doc.as_str())
    }

    fn with_doc<T>(
        &self,
        doc: &DocumentId,
        f: impl FnOnce(&[u8]) -> Result<T, ReaderError>,
    ) -> Result<T, ReaderError> {
        {
            let cache = self.cache.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(bytes) = cache.get(doc) {
                return f(bytes);
            }
        }
        let path = self.doc_path(doc);
        let bytes = std::fs::read(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ReaderError::NotFound { doc: doc.clone() }
            } else {
                tracing::warn!(doc = %doc, path = %path.display(), error = %source, "corpus read failed");
                ReaderError::Transport {
                    doc: doc.clone(),
                    source,
                }
            }
        })?;
        let mut cache = self.cache.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let bytes = cache.entry(doc.clone()).or_insert(bytes);
        f(bytes)
    }

    /// Document ids present on disk, sorted by name for a stable order.
    pub fn doc_ids(&self) -> Result<Vec<DocumentId>, io::Error> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                ids.push(DocumentId::new(entry.file_name().to_string_lossy().into_owned()));
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl CanonicalReader for DirCorpus {
    fn read(&self, doc: &DocumentId, start: u64, end: u64) -> Result<Vec<u8>, ReaderError> {
        self.with_doc(doc, |bytes| {
            check_range(doc, bytes, start, end)?;
            Ok(bytes[start as usize..end as usize].to_vec())
        })
    }

    fn length(&self, doc: &DocumentId) -> Result<u64, ReaderError> {
        self.with_doc(doc, |bytes| Ok(bytes.len() as u64))
    }

    fn exists(&self, doc: &DocumentId) -> bool {
        self.length(doc).is_ok()
    }
}

impl<R: CanonicalReader + ?Sized> CanonicalReader for &R {
    fn read(&self, doc: &DocumentId, start: u64, end: u64) -> Result<Vec<u8>, ReaderError> {
        (**self).read(doc, start, end)
    }

    fn length(&self, doc: &DocumentId) -> Result<u64, ReaderError> {
        (**self).length(doc)
    }

    fn exists(&self, doc: &DocumentId) -> bool {
        (**self).exists(doc)
    }
}

impl<R: CanonicalReader + ?Sized> CanonicalReader for std::sync::Arc<R> {
    fn read(&self, doc: &DocumentId, start: u64, end: u64) -> Result<Vec<u8>, ReaderError> {
        (**self).read(doc, start, end)
    }

    fn length(&self, doc: &DocumentId) -> Result<u64, ReaderError> {
        (**self).length(doc)
    }

    fn exists(&self, doc: &DocumentId) -> bool {
        (**self).exists(doc)
    }
}

#[cfg(test)]
mod tests {
    use rlm_types::DocumentId;

    use super::{CanonicalReader, DirCorpus, InMemoryCorpus, ReaderError};

    fn corpus() -> InMemoryCorpus {
        let mut c = InMemoryCorpus::new();
        c.insert(DocumentId::from("a.txt"), &b"Alpha Beta Gamma"[..]);
        c
    }

    #[test]
    fn read_returns_exact_range() {
        let c = corpus();
        let doc = DocumentId::from("a.txt");
        assert_eq!(c.read(&doc, 0, 5).expect("read"), b"Alpha");
        assert_eq!(c.read(&doc, 6, 10).expect("read"), b"Beta");
        assert_eq!(c.read(&doc, 16, 16).expect("empty read"), b"");
    }

    #[test]
    fn read_rejects_bad_ranges() {
        let c = corpus();
        let doc = DocumentId::from("a.txt");
        assert!(matches!(
            c.read(&doc, 0, 17),
            Err(ReaderError::OutOfRange { len: 16, .. })
        ));
        assert!(matches!(
            c.read(&doc, 9, 3),
            Err(ReaderError::OutOfRange { .. })
        ));
    }

    #[test]
    fn unknown_doc_is_not_found() {
        let c = corpus();
        let doc = DocumentId::from("missing");
        assert!(!c.exists(&doc));
        assert!(matches!(c.read(&doc, 0, 1), Err(ReaderError::NotFound { .. })));
        assert!(matches!(c.length(&doc), Err(ReaderError::NotFound { .. })));
    }

    #[test]
    fn insert_is_write_once() {
        let mut c = corpus();
        let doc = DocumentId::from("a.txt");
        c.insert(doc.clone(), &b"overwritten"[..]);
        assert_eq!(c.read(&doc, 0, 5).expect("read"), b"Alpha");
        assert_eq!(c.doc_ids().len(), 1);
    }

    #[test]
    fn dir_corpus_reads_and_caches() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("doc-0"), b"Alpha Beta Gamma").expect("write");
        let c = DirCorpus::new(dir.path());
        let doc = DocumentId::from("doc-0");

        assert_eq!(c.length(&doc).expect("length"), 16);
        assert_eq!(c.read(&doc, 6, 10).expect("read"), b"Beta");

        // Cached: deleting the backing file does not change served bytes.
        std::fs::remove_file(dir.path().join("doc-0")).expect("remove");
        assert_eq!(c.read(&doc, 0, 5).expect("cached read"), b"Alpha");
    }

    #[test]
    fn dir_corpus_lists_sorted_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b"), b"1").expect("write");
        std::fs::write(dir.path().join("a"), b"2").expect("write");
        let c = DirCorpus::new(dir.path());
        let ids = c.doc_ids().expect("ids");
        assert_eq!(ids, vec![DocumentId::from("a"), DocumentId::from("b")]);
    }
}
