//! Canonical artifact readers for the RLM runtime.
//!
//! The canonical text of a document is the immutable UTF-8 byte sequence
//! produced by ingestion. Readers here hand out exact byte ranges of it and
//! nothing else: no truncation, no re-encoding, no normalization. Reads are
//! idempotent and safe under concurrent use; every cited byte in the system
//! traces back through one of these readers.

mod descriptor;
mod reader;

pub use descriptor::{ContextDescriptor, DescriptorError};
pub use reader::{CanonicalReader, DirCorpus, InMemoryCorpus, ReaderError};
