//! Pipeline error types
//!
//! Only capture-file format and I/O problems are fatal. Everything else
//! (malformed frames, unreachable web endpoints, bad configuration) is
//! handled locally and surfaced through counters or per-record error
//! fields.

/// Errors that can escape the detection pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Capture file magic or global header is malformed. Fatal for that file.
    #[error("invalid capture file: {0}")]
    InvalidFormat(String),

    /// Underlying I/O failure opening or reading an input file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The web enrichment collaborator could not be constructed.
    #[error("web analyzer unavailable: {0}")]
    Enrichment(String),
}

/// Non-fatal decode failures inside a single frame or DNS message.
///
/// These never leave the extractor; each one increments `parse_errors`
/// and drops the offending packet or question.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Message ended before the field being read.
    #[error("message truncated")]
    Truncated,

    /// Label length byte outside the 1..=63 range (and not a pointer).
    #[error("label length {0} out of range")]
    BadLabel(u8),

    /// Compression pointer target past the end of the message.
    #[error("compression pointer {0:#06x} out of bounds")]
    PointerOutOfBounds(usize),

    /// Pointer chain exceeded the jump cap (loop guard).
    #[error("compression pointer chain too long")]
    PointerLoop,
}
