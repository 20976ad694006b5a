//! The ordered document set one step runs against.

use std::collections::HashSet;

use rlm_types::{DocumentId, SessionId};
use thiserror::Error;

use crate::reader::CanonicalReader;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("duplicate document id: {doc}")]
    Duplicate { doc: DocumentId },
    #[error("document not ready: {doc}")]
    NotReady { doc: DocumentId },
}

/// Ordered list of documents visible to one step, plus the owning session.
///
/// Built by the orchestrator before each step; every listed document must be
/// ready in the backing reader. Order is meaningful: `ctx.docs()` exposes
/// documents in exactly this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextDescriptor {
    session: SessionId,
    docs: Vec<DocumentId>,
}

impl ContextDescriptor {
    pub fn new(session: SessionId, docs: Vec<DocumentId>) -> Result<Self, DescriptorError> {
        let mut seen = HashSet::new();
        for doc in &docs {
            if !seen.insert(doc.clone()) {
                return Err(DescriptorError::Duplicate { doc: doc.clone() });
            }
        }
        Ok(Self { session, docs })
    }

    /// Check readiness of every listed document against a reader.
    pub fn ensure_ready<R: CanonicalReader>(&self, reader: &R) -> Result<(), DescriptorError> {
        for doc in &self.docs {
            if !reader.exists(doc) {
                return Err(DescriptorError::NotReady { doc: doc.clone() });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    #[must_use]
    pub fn docs(&self) -> &[DocumentId] {
        &self.docs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rlm_types::{DocumentId, SessionId};

    use super::{ContextDescriptor, DescriptorError};
    use crate::reader::InMemoryCorpus;

    #[test]
    fn duplicates_are_rejected() {
        let err = ContextDescriptor::new(
            SessionId::new("s"),
            vec![DocumentId::from("a"), DocumentId::from("a")],
        )
        .expect_err("duplicate");
        assert!(matches!(err, DescriptorError::Duplicate { .. }));
    }

    #[test]
    fn readiness_checks_every_document() {
        let mut corpus = InMemoryCorpus::new();
        corpus.insert(DocumentId::from("a"), &b"x"[..]);
        let descriptor = ContextDescriptor::new(
            SessionId::new("s"),
            vec![DocumentId::from("a"), DocumentId::from("b")],
        )
        .expect("descriptor");
        assert!(matches!(
            descriptor.ensure_ready(&corpus),
            Err(DescriptorError::NotReady { .. })
        ));
    }

    #[test]
    fn order_is_preserved() {
        let descriptor = ContextDescriptor::new(
            SessionId::new("s"),
            vec![DocumentId::from("z"), DocumentId::from("a")],
        )
        .expect("descriptor");
        let ids: Vec<&str> = descriptor.docs().iter().map(DocumentId::as_str).collect();
        assert_eq!(ids, vec!["z", "a"]);
    }
}
