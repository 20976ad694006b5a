//! Independent SpanRef verification.

use rlm_corpus::{CanonicalReader, ReaderError};
use rlm_types::{Sha256Hex, SpanRef};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    ChecksumMismatch,
    DocNotFound,
    OutOfRange,
    /// The read itself failed; verification can be retried.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verification {
    Valid,
    Invalid { reason: InvalidReason },
}

impl Verification {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid)
    }
}

/// Re-read the cited bytes and compare checksums.
///
/// Trusts only the canonical reader: the preview, the model's answer, and
/// anything else attached to the execution play no part in the verdict.
pub fn verify<R: CanonicalReader + ?Sized>(span_ref: &SpanRef, reader: &R) -> Verification {
    let payload = match reader.read(&span_ref.doc, span_ref.start, span_ref.end) {
        Ok(payload) => payload,
        Err(ReaderError::NotFound { .. }) => {
            return Verification::Invalid {
                reason: InvalidReason::DocNotFound,
            };
        }
        Err(ReaderError::OutOfRange { .. }) => {
            return Verification::Invalid {
                reason: InvalidReason::OutOfRange,
            };
        }
        Err(ReaderError::Transport { doc, source }) => {
            tracing::warn!(doc = %doc, error = %source, "verification read failed");
            return Verification::Invalid {
                reason: InvalidReason::Transport,
            };
        }
    };
    if payload.len() as u64 != span_ref.byte_len() {
        return Verification::Invalid {
            reason: InvalidReason::ChecksumMismatch,
        };
    }
    if Sha256Hex::of(&payload) == span_ref.sha256 {
        Verification::Valid
    } else {
        Verification::Invalid {
            reason: InvalidReason::ChecksumMismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use rlm_corpus::InMemoryCorpus;
    use rlm_types::{DocumentId, Sha256Hex, SpanRef};

    use super::{InvalidReason, Verification, verify};

    fn corpus() -> InMemoryCorpus {
        let mut corpus = InMemoryCorpus::new();
        corpus.insert(DocumentId::from("doc-0"), &b"Alpha Beta Gamma"[..]);
        corpus
    }

    fn span_ref(start: u64, end: u64, payload: &[u8]) -> SpanRef {
        SpanRef {
            doc: DocumentId::from("doc-0"),
            start,
            end,
            sha256: Sha256Hex::of(payload),
            preview: String::new(),
        }
    }

    #[test]
    fn matching_checksum_is_valid() {
        let verdict = verify(&span_ref(0, 5, b"Alpha"), &corpus());
        assert!(verdict.is_valid());
    }

    #[test]
    fn tampered_checksum_is_invalid() {
        let verdict = verify(&span_ref(0, 5, b"Beta!"), &corpus());
        assert_eq!(
            verdict,
            Verification::Invalid {
                reason: InvalidReason::ChecksumMismatch
            }
        );
    }

    #[test]
    fn shifted_range_is_invalid() {
        // Same text, wrong offsets: the recomputed digest differs.
        let verdict = verify(&span_ref(1, 6, b"Alpha"), &corpus());
        assert_eq!(
            verdict,
            Verification::Invalid {
                reason: InvalidReason::ChecksumMismatch
            }
        );
    }

    #[test]
    fn unknown_document_is_reported() {
        let mut bad = span_ref(0, 5, b"Alpha");
        bad.doc = DocumentId::from("ghost");
        assert_eq!(
            verify(&bad, &corpus()),
            Verification::Invalid {
                reason: InvalidReason::DocNotFound
            }
        );
    }

    #[test]
    fn out_of_range_is_reported() {
        let verdict = verify(&span_ref(10, 99, b"x"), &corpus());
        assert_eq!(
            verdict,
            Verification::Invalid {
                reason: InvalidReason::OutOfRange
            }
        );
    }

    #[test]
    fn preview_plays_no_part_in_the_verdict() {
        let mut tampered = span_ref(0, 5, b"Alpha");
        tampered.preview = "fabricated preview".to_string();
        assert!(verify(&tampered, &corpus()).is_valid());
    }
}
