//! From span candidates to verifiable SpanRefs.

use rlm_corpus::{CanonicalReader, ReaderError};
use rlm_types::{
    Sha256Hex, SpanEntry, SpanRef, SpanRefCandidate, ToolKind, ToolRequest,
};
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct CitationConfig {
    /// Upper bound on preview size in bytes.
    pub preview_bytes: usize,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self { preview_bytes: 240 }
    }
}

#[derive(Debug, Error)]
pub enum CiteError {
    /// The program cited bytes it never read. Hard error: fails the
    /// execution, not merely the step.
    #[error("uncovered citation: {} [{}, {}) was never observed", .candidate.doc, .candidate.start, .candidate.end)]
    UnseenSpan { candidate: SpanRefCandidate },
    #[error("canonical read failed during derivation: {0}")]
    Reader(#[from] ReaderError),
    #[error("malformed final request: {0}")]
    MalformedFinal(String),
}

/// Extract the answer and span candidates from a persisted `final` request.
pub fn final_from_request(
    request: &ToolRequest,
) -> Result<(String, Vec<SpanRefCandidate>), CiteError> {
    if request.kind != ToolKind::Final {
        return Err(CiteError::MalformedFinal(format!(
            "expected a final request, got {}",
            request.kind.as_str()
        )));
    }
    let answer = request
        .args
        .get("answer")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CiteError::MalformedFinal("missing 'answer'".to_string()))?
        .to_string();
    let spans = request
        .args
        .get("spans")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| CiteError::MalformedFinal("missing 'spans'".to_string()))?;
    let candidates = spans
        .iter()
        .map(|span| {
            serde_json::from_value::<SpanRefCandidate>(span.clone())
                .map_err(|e| CiteError::MalformedFinal(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((answer, candidates))
}

/// Derive SpanRefs for the candidates attached to a successful `FINAL`.
///
/// Coverage rule: a candidate's byte range must lie inside at least one
/// logged entry for the same document. Duplicates (same doc and range)
/// collapse to the first occurrence; partial overlaps stay distinct.
pub fn derive_citations<R: CanonicalReader + ?Sized>(
    candidates: &[SpanRefCandidate],
    span_log: &[SpanEntry],
    reader: &R,
    config: CitationConfig,
) -> Result<Vec<SpanRef>, CiteError> {
    let mut refs: Vec<SpanRef> = Vec::new();
    for candidate in candidates {
        let covered = span_log
            .iter()
            .any(|entry| entry.covers(&candidate.doc, candidate.start, candidate.end));
        if !covered {
            tracing::warn!(
                doc = %candidate.doc,
                start = candidate.start,
                end = candidate.end,
                "citation outside the span log"
            );
            return Err(CiteError::UnseenSpan {
                candidate: candidate.clone(),
            });
        }
        if refs
            .iter()
            .any(|r| r.doc == candidate.doc && r.start == candidate.start && r.end == candidate.end)
        {
            continue;
        }
        let payload = reader.read(&candidate.doc, candidate.start, candidate.end)?;
        let preview = preview(reader, candidate, config.preview_bytes)?;
        refs.push(SpanRef {
            doc: candidate.doc.clone(),
            start: candidate.start,
            end: candidate.end,
            sha256: Sha256Hex::of(&payload),
            preview,
        });
    }
    Ok(refs)
}

/// A short canonical slice around the cited range, at most `budget` bytes,
/// clipped to the document and snapped to UTF-8 boundaries.
fn preview<R: CanonicalReader + ?Sized>(
    reader: &R,
    candidate: &SpanRefCandidate,
    budget: usize,
) -> Result<String, CiteError> {
    let doc_len = reader.length(&candidate.doc)?;
    let range_len = candidate.end - candidate.start;
    let budget = budget as u64;
    let (lo, hi) = if range_len >= budget {
        (candidate.start, candidate.start + budget)
    } else {
        let spare = budget - range_len;
        let lo = candidate.start.saturating_sub(spare / 2);
        let hi = (candidate.end + (spare - spare / 2)).min(doc_len);
        // Reclaim unused right-side budget on the left when near the end.
        (lo.saturating_sub(budget - (hi - lo)), hi)
    };
    let mut bytes = reader.read(&candidate.doc, lo, hi)?;
    // Snap the window to code-point boundaries: drop leading continuation
    // bytes, then any incomplete sequence at the tail.
    let lead = bytes
        .iter()
        .take_while(|b| **b & 0b1100_0000 == 0b1000_0000)
        .count();
    bytes.drain(..lead);
    if let Err(err) = std::str::from_utf8(&bytes) {
        if err.error_len().is_none() {
            bytes.truncate(err.valid_up_to());
        }
        // Canonical text is UTF-8 by contract; anything else decodes
        // lossily rather than failing derivation.
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use rlm_corpus::InMemoryCorpus;
    use rlm_types::{DocumentId, Sha256Hex, SpanEntry, SpanRefCandidate};

    use super::{CitationConfig, CiteError, derive_citations};

    fn corpus(text: &[u8]) -> InMemoryCorpus {
        let mut corpus = InMemoryCorpus::new();
        corpus.insert(DocumentId::from("doc-0"), text);
        corpus
    }

    fn entry(start: u64, end: u64, payload: &[u8]) -> SpanEntry {
        SpanEntry::new(
            DocumentId::from("doc-0"),
            start,
            end,
            Sha256Hex::of(payload),
        )
        .expect("valid entry")
    }

    fn candidate(start: u64, end: u64) -> SpanRefCandidate {
        SpanRefCandidate {
            doc: DocumentId::from("doc-0"),
            start,
            end,
            label: None,
        }
    }

    #[test]
    fn covered_candidate_becomes_checksummed_ref() {
        let corpus = corpus(b"Alpha Beta Gamma");
        let log = vec![entry(0, 5, b"Alpha")];
        let refs = derive_citations(
            &[candidate(0, 5)],
            &log,
            &corpus,
            CitationConfig::default(),
        )
        .expect("derive");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].sha256, Sha256Hex::of(b"Alpha"));
        assert_eq!(refs[0].preview, "Alpha Beta Gamma");
    }

    #[test]
    fn sub_range_of_logged_entry_is_covered() {
        let corpus = corpus(b"Alpha Beta Gamma");
        let log = vec![entry(0, 16, b"Alpha Beta Gamma")];
        let refs = derive_citations(
            &[candidate(6, 10)],
            &log,
            &corpus,
            CitationConfig::default(),
        )
        .expect("derive");
        assert_eq!(refs[0].sha256, Sha256Hex::of(b"Beta"));
    }

    #[test]
    fn uncovered_candidate_is_a_hard_error() {
        let corpus = corpus(b"Alpha Beta Gamma");
        let log = vec![entry(0, 5, b"Alpha")];
        let err = derive_citations(
            &[candidate(6, 10)],
            &log,
            &corpus,
            CitationConfig::default(),
        )
        .expect_err("unseen");
        assert!(matches!(err, CiteError::UnseenSpan { candidate } if candidate.start == 6));
    }

    #[test]
    fn coverage_requires_a_single_containing_entry() {
        // Two adjacent observations do not merge into one covering range.
        let corpus = corpus(b"Alpha Beta Gamma");
        let log = vec![entry(0, 5, b"Alpha"), entry(5, 10, b" Beta")];
        let err = derive_citations(
            &[candidate(0, 10)],
            &log,
            &corpus,
            CitationConfig::default(),
        )
        .expect_err("straddles entries");
        assert!(matches!(err, CiteError::UnseenSpan { .. }));
    }

    #[test]
    fn duplicates_collapse_partial_overlaps_stay() {
        let corpus = corpus(b"Alpha Beta Gamma");
        let log = vec![entry(0, 16, b"Alpha Beta Gamma")];
        let refs = derive_citations(
            &[candidate(0, 5), candidate(0, 5), candidate(3, 8)],
            &log,
            &corpus,
            CitationConfig::default(),
        )
        .expect("derive");
        assert_eq!(refs.len(), 2);
        assert_eq!((refs[0].start, refs[0].end), (0, 5));
        assert_eq!((refs[1].start, refs[1].end), (3, 8));
    }

    #[test]
    fn preview_is_budget_bounded_and_centered() {
        let text: String = "x".repeat(100) + "TARGET" + &"y".repeat(100);
        let corpus = corpus(text.as_bytes());
        let log = vec![entry(0, 206, text.as_bytes())];
        let refs = derive_citations(
            &[candidate(100, 106)],
            &log,
            &corpus,
            CitationConfig { preview_bytes: 20 },
        )
        .expect("derive");
        let preview = &refs[0].preview;
        assert!(preview.len() <= 20);
        assert!(preview.contains("TARGET"));
        assert!(preview.starts_with('x'));
        assert!(preview.ends_with('y'));
    }

    #[test]
    fn long_range_preview_takes_the_head() {
        let text = "abcdefghij".repeat(10);
        let corpus = corpus(text.as_bytes());
        let log = vec![entry(0, 100, text.as_bytes())];
        let refs = derive_citations(
            &[candidate(0, 100)],
            &log,
            &corpus,
            CitationConfig { preview_bytes: 10 },
        )
        .expect("derive");
        assert_eq!(refs[0].preview, "abcdefghij");
    }

    #[test]
    fn preview_snaps_to_utf8_boundaries() {
        // Four 3-byte arrows; a 4-byte budget cannot split one.
        let text = "→→→→";
        let corpus = corpus(text.as_bytes());
        let log = vec![entry(0, 12, text.as_bytes())];
        let refs = derive_citations(
            &[candidate(3, 6)],
            &log,
            &corpus,
            CitationConfig { preview_bytes: 4 },
        )
        .expect("derive");
        assert!(refs[0].preview.chars().all(|c| c == '→'));
    }

    #[test]
    fn wrong_document_is_not_coverage() {
        let mut corpus = corpus(b"Alpha Beta Gamma");
        corpus.insert(DocumentId::from("doc-1"), &b"Alpha Beta Gamma"[..]);
        let log = vec![entry(0, 16, b"Alpha Beta Gamma")];
        let other = SpanRefCandidate {
            doc: DocumentId::from("doc-1"),
            start: 0,
            end: 5,
            label: None,
        };
        let err = derive_citations(&[other], &log, &corpus, CitationConfig::default())
            .expect_err("different doc");
        assert!(matches!(err, CiteError::UnseenSpan { .. }));
    }
}
