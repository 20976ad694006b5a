//! Citation derivation and verification.
//!
//! Derivation turns a `FINAL` request's span candidates into persisted
//! [`SpanRef`]s, trusting nothing the program said: every candidate must lie
//! inside a logged observation, and every checksum is recomputed from the
//! canonical reader. Verification is separately callable and reproduces a
//! SpanRef's checksum from stored artifacts alone, so a citation can be
//! audited long after the execution that produced it.

mod derive;
mod verify;

pub use derive::{CitationConfig, CiteError, derive_citations, final_from_request};
pub use verify::{InvalidReason, Verification, verify};
